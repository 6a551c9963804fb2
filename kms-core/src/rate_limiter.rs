//! Fixed-window admission control
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


use kms_config::{RateLimitConfig, RateLimitsConfig};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Deny { retry_after_secs: u64 },
}

impl RateDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allow)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bucket {
    count: u32,
    reset_at: Instant,
}

/// Rate limiter using fixed, non-overlapping windows per key
///
/// Up to `2 * max` requests can pass across a window boundary.
pub struct FixedWindowLimiter {
    name: &'static str,
    /// Requests allowed per key per window
    max: u32,
    window: Duration,
    /// Bound on the number of tracked keys
    max_keys: usize,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl FixedWindowLimiter {
    /// Create a new limiter
    ///
    /// # Example
    /// ```
    /// use kms_core::rate_limiter::FixedWindowLimiter;
    /// use std::time::Duration;
    ///
    /// // Allow 5 token rotations per 10 seconds per caller
    /// let limiter = FixedWindowLimiter::new("rotate", 5, Duration::from_secs(10), 10_000);
    /// ```
    pub fn new(name: &'static str, max: u32, window: Duration, max_keys: usize) -> Self {
        Self {
            name,
            max,
            window,
            max_keys: max_keys.max(1),
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(name: &'static str, config: RateLimitConfig, max_keys: usize) -> Self {
        Self::new(name, config.max, Duration::from_millis(config.window_ms), max_keys)
    }

    /// Count one request for `key`
    pub async fn check(&self, key: &str) -> RateDecision {
        self.check_at(key, Instant::now()).await
    }

    async fn check_at(&self, key: &str, now: Instant) -> RateDecision {
        let mut buckets = self.buckets.lock().await;

        if !buckets.contains_key(key) && buckets.len() >= self.max_keys {
            self.make_room(&mut buckets, now);
        }

        let bucket = buckets.entry(key.to_string()).or_insert(Bucket {
            count: 0,
            reset_at: now + self.window,
        });
        if now >= bucket.reset_at {
            bucket.count = 0;
            bucket.reset_at = now + self.window;
        }

        if bucket.count >= self.max {
            let retry_after_secs = retry_after(bucket.reset_at.saturating_duration_since(now));
            warn!(
                limiter = self.name,
                retry_after_secs = retry_after_secs,
                "Rate limit exceeded"
            );
            return RateDecision::Deny { retry_after_secs };
        }

        bucket.count += 1;
        RateDecision::Allow
    }

    /// Drop every bucket whose window has ended; returns how many were removed
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().await;
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.reset_at > now);
        before - buckets.len()
    }

    /// Number of keys currently tracked
    pub async fn tracked_keys(&self) -> usize {
        self.buckets.lock().await.len()
    }

    fn make_room(&self, buckets: &mut HashMap<String, Bucket>, now: Instant) {
        buckets.retain(|_, bucket| bucket.reset_at > now);
        if buckets.len() < self.max_keys {
            return;
        }

        let oldest = buckets
            .iter()
            .min_by_key(|(_, bucket)| bucket.reset_at)
            .map(|(key, _)| key.clone());
        if let Some(oldest) = oldest {
            buckets.remove(&oldest);
            debug!(limiter = self.name, "Evicted oldest rate-limit bucket");
        }
    }
}

/// Whole seconds until the window resets, never less than one
fn retry_after(remaining: Duration) -> u64 {
    let millis = remaining.as_millis() as u64;
    millis.div_ceil(1000).max(1)
}

/// One independent limiter per protected capability group
pub struct RateLimiters {
    pub rotate: FixedWindowLimiter,
    pub crypto: FixedWindowLimiter,
    pub keys: FixedWindowLimiter,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitsConfig) -> Self {
        Self {
            rotate: FixedWindowLimiter::from_config("rotate", config.rotate, config.max_tracked_keys),
            crypto: FixedWindowLimiter::from_config("crypto", config.crypto, config.max_tracked_keys),
            keys: FixedWindowLimiter::from_config("keys", config.keys, config.max_tracked_keys),
        }
    }

    /// Sweep ended windows from every group
    pub async fn sweep(&self) -> usize {
        self.rotate.sweep().await + self.crypto.sweep().await + self.keys.sweep().await
    }
}
