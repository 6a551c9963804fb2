//! Configuration management for the KMS services

use serde::Deserialize;
use std::env;
use std::str::FromStr;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_KEY_STORE_PATH: &str = "./data/keys";
const DEFAULT_SESSION_TTL_MS: u64 = 15 * 60 * 1000;
const DEFAULT_CRYPTO_PLAINTEXT_BYTES: usize = 10 * 1024 * 1024;
const MAX_CRYPTO_PLAINTEXT_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_RSA_BITS: usize = 4096;
const MIN_RSA_BITS: usize = 1024;
const DEFAULT_GRACE_PERIOD_SECS: u64 = 7 * 24 * 60 * 60;
const MAX_GRACE_PERIOD_SECS: u64 = 10 * 365 * 24 * 60 * 60;
const DEFAULT_RATE_LIMIT_MAX_KEYS: usize = 10_000;

/// Session lifecycle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub ttl_ms: u64,
    /// Renew expiry on token rotation/replacement
    pub sliding: bool,
    pub token_prefix: Option<String>,
}

/// Key store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct KeyStoreConfig {
    /// Directory holding `keys.json` and the handshake RSA key pair
    pub path: String,
    pub rsa_bits: usize,
    pub grace_period_secs: u64,
}

/// One fixed-window limiter
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max: u32,
}

/// Limiter settings per protected capability group
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitsConfig {
    pub rotate: RateLimitConfig,
    pub crypto: RateLimitConfig,
    pub keys: RateLimitConfig,
    /// Upper bound on buckets tracked by each limiter
    pub max_tracked_keys: usize,
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
}

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub port: u16,
    pub key_store: KeyStoreConfig,
    pub session: SessionConfig,
    pub rate_limits: RateLimitsConfig,
    pub crypto_plaintext_limit_bytes: usize,
    pub log_level: Option<String>,
    pub log_format: LogFormat,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, config::ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let port = parse_or(var("KMS_PORT"), DEFAULT_PORT);
        let key_store_path =
            var("KEY_STORE_PATH").unwrap_or_else(|| DEFAULT_KEY_STORE_PATH.to_string());

        let session = SessionConfig {
            ttl_ms: parse_or(var("KMS_SESSION_TTL_MS"), DEFAULT_SESSION_TTL_MS),
            sliding: var("KMS_SESSION_SLIDING")
                .map(|v| v == "true")
                .unwrap_or(true),
            token_prefix: var("KMS_TOKEN_PREFIX"),
        };

        let rate_limits = RateLimitsConfig {
            rotate: RateLimitConfig {
                window_ms: parse_or(var("KMS_ROTATE_WINDOW_MS"), 10_000),
                max: parse_or(var("KMS_ROTATE_MAX"), 5),
            },
            crypto: RateLimitConfig {
                window_ms: parse_or(var("KMS_CRYPTO_WINDOW_MS"), 10_000),
                max: parse_or(var("KMS_CRYPTO_MAX"), 50),
            },
            keys: RateLimitConfig {
                window_ms: parse_or(var("KMS_KEYS_WINDOW_MS"), 10_000),
                max: parse_or(var("KMS_KEYS_MAX"), 20),
            },
            max_tracked_keys: parse_or(
                var("KMS_RATE_LIMIT_MAX_KEYS"),
                DEFAULT_RATE_LIMIT_MAX_KEYS,
            ),
        };

        let plaintext_limit: i64 = parse_or(
            var("KMS_CRYPTO_MAX_PLAINTEXT_BYTES").or_else(|| var("KMS_CRYPTO_PLAINTEXT_BYTES")),
            DEFAULT_CRYPTO_PLAINTEXT_BYTES as i64,
        );
        let crypto_plaintext_limit_bytes = if plaintext_limit > 0 {
            (plaintext_limit as usize).min(MAX_CRYPTO_PLAINTEXT_BYTES)
        } else {
            DEFAULT_CRYPTO_PLAINTEXT_BYTES
        };

        let log_format = match var("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Console,
        };

        let config = Self {
            port,
            key_store: KeyStoreConfig {
                path: key_store_path,
                rsa_bits: parse_or(var("KMS_RSA_BITS"), DEFAULT_RSA_BITS),
                grace_period_secs: parse_or(
                    var("KMS_KEY_GRACE_PERIOD_SECS"),
                    DEFAULT_GRACE_PERIOD_SECS,
                ),
            },
            session,
            rate_limits,
            crypto_plaintext_limit_bytes,
            log_level: Some(var("LOG_LEVEL").unwrap_or_else(|| "info".to_string())),
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if self.session.ttl_ms == 0 {
            return Err(config::ConfigError::Message(
                "KMS_SESSION_TTL_MS must be positive".to_string(),
            ));
        }
        if self.key_store.rsa_bits < MIN_RSA_BITS {
            return Err(config::ConfigError::Message(format!(
                "KMS_RSA_BITS must be at least {}",
                MIN_RSA_BITS
            )));
        }
        if self.key_store.grace_period_secs > MAX_GRACE_PERIOD_SECS {
            return Err(config::ConfigError::Message(format!(
                "KMS_KEY_GRACE_PERIOD_SECS must be at most {}",
                MAX_GRACE_PERIOD_SECS
            )));
        }
        for (name, limit) in [
            ("rotate", self.rate_limits.rotate),
            ("crypto", self.rate_limits.crypto),
            ("keys", self.rate_limits.keys),
        ] {
            if limit.window_ms == 0 || limit.max == 0 {
                return Err(config::ConfigError::Message(format!(
                    "Rate limit '{}' needs a positive window and max",
                    name
                )));
            }
        }
        if let Some(prefix) = &self.session.token_prefix {
            if !prefix.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(config::ConfigError::Message(
                    "KMS_TOKEN_PREFIX may only contain ASCII letters, digits and '-'".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Get key store directory
    pub fn key_store_path(&self) -> &str {
        &self.key_store.path
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig, config::ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.key_store_path(), "./data/keys");
        assert_eq!(config.session.ttl_ms, 900_000);
        assert!(config.session.sliding);
        assert!(config.session.token_prefix.is_none());
        assert_eq!(config.rate_limits.rotate.max, 5);
        assert_eq!(config.rate_limits.crypto.max, 50);
        assert_eq!(config.rate_limits.keys.max, 20);
        assert_eq!(config.rate_limits.keys.window_ms, 10_000);
        assert_eq!(config.key_store.rsa_bits, 4096);
        assert_eq!(config.key_store.grace_period_secs, 604_800);
        assert_eq!(config.crypto_plaintext_limit_bytes, 10 * 1024 * 1024);
        assert_eq!(config.log_level(), "info");
        assert_eq!(config.log_format, LogFormat::Console);
    }

    #[test]
    fn test_config_overrides() {
        let config = config_from(&[
            ("KMS_PORT", "8443"),
            ("KMS_SESSION_SLIDING", "false"),
            ("KMS_TOKEN_PREFIX", "kms"),
            ("KMS_ROTATE_MAX", "2"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.port, 8443);
        assert!(!config.session.sliding);
        assert_eq!(config.session.token_prefix.as_deref(), Some("kms"));
        assert_eq!(config.rate_limits.rotate.max, 2);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let config = config_from(&[("KMS_PORT", "not-a-port"), ("KMS_KEYS_MAX", "-3")]).unwrap();
        assert_eq!(config.port, 3000);
        assert_eq!(config.rate_limits.keys.max, 20);
    }

    #[test]
    fn test_plaintext_limit_is_capped() {
        let config = config_from(&[("KMS_CRYPTO_MAX_PLAINTEXT_BYTES", "999999999999")]).unwrap();
        assert_eq!(config.crypto_plaintext_limit_bytes, 64 * 1024 * 1024);

        let config = config_from(&[("KMS_CRYPTO_PLAINTEXT_BYTES", "0")]).unwrap();
        assert_eq!(config.crypto_plaintext_limit_bytes, 10 * 1024 * 1024);

        let config = config_from(&[("KMS_CRYPTO_PLAINTEXT_BYTES", "2048")]).unwrap();
        assert_eq!(config.crypto_plaintext_limit_bytes, 2048);
    }

    #[test]
    fn test_rejects_zero_rate_limit() {
        assert!(config_from(&[("KMS_CRYPTO_MAX", "0")]).is_err());
        assert!(config_from(&[("KMS_SESSION_TTL_MS", "0")]).is_err());
        assert!(config_from(&[("KMS_RSA_BITS", "512")]).is_err());
        assert!(config_from(&[("KMS_TOKEN_PREFIX", "bad prefix")]).is_err());
    }

    #[test]
    fn test_grace_period_is_bounded() {
        let config = config_from(&[("KMS_KEY_GRACE_PERIOD_SECS", "315360000")]).unwrap();
        assert_eq!(config.key_store.grace_period_secs, MAX_GRACE_PERIOD_SECS);

        assert!(config_from(&[("KMS_KEY_GRACE_PERIOD_SECS", "315360001")]).is_err());
        assert!(config_from(&[("KMS_KEY_GRACE_PERIOD_SECS", "18446744073709551615")]).is_err());
    }
}
