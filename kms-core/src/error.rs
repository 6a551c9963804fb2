//! Error types for the KMS core
// Copyright 2025 Francisco F. Pinochet
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use thiserror::Error;

/// KMS errors
#[derive(Error, Debug)]
pub enum KmsError {
    #[error("No active session for credential")]
    Unauthorized,

    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Storage corrupt: {0}")]
    StorageCorrupt(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Crypto error: {0}")]
    Crypto(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl KmsError {
    /// Stable wire code for the error
    pub fn code(&self) -> &'static str {
        match self {
            KmsError::Unauthorized => "UNAUTHORIZED",
            KmsError::InvalidFormat(_) => "INVALID_FORMAT",
            KmsError::Conflict(_) => "TOKEN_CONFLICT",
            KmsError::NotFound(_) => "NOT_FOUND",
            KmsError::AuthenticationFailed => "DECRYPT_FAILED",
            KmsError::RateLimited { .. } => "RATE_LIMITED",
            KmsError::StorageCorrupt(_) => "STORAGE_CORRUPT",
            KmsError::PermissionDenied(_) => "PERMISSION_DENIED",
            KmsError::Crypto(_) => "CRYPTO_FAILED",
            KmsError::Io(_) | KmsError::Serialization(_) => "INTERNAL_ERROR",
        }
    }
}

/// Result type for KMS operations
pub type KmsResult<T> = Result<T, KmsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(KmsError::Unauthorized.code(), "UNAUTHORIZED");
        assert_eq!(KmsError::Conflict("t".into()).code(), "TOKEN_CONFLICT");
        assert_eq!(
            KmsError::RateLimited { retry_after_secs: 3 }.to_string(),
            "Rate limited, retry after 3s"
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(KmsError::from(io).code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_every_variant_has_a_distinct_wire_code() {
        let errors = [
            KmsError::Unauthorized,
            KmsError::InvalidFormat("t".into()),
            KmsError::Conflict("t".into()),
            KmsError::NotFound("k".into()),
            KmsError::AuthenticationFailed,
            KmsError::RateLimited { retry_after_secs: 1 },
            KmsError::StorageCorrupt("s".into()),
            KmsError::PermissionDenied("p".into()),
            KmsError::Crypto("c".into()),
            KmsError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk")),
        ];
        let codes: std::collections::HashSet<&str> = errors.iter().map(KmsError::code).collect();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains("CONFIGURATION_ERROR"));
    }
}
