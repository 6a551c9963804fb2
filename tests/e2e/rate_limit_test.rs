//! Fixed-window limiter behavior in real time

use kms_config::{RateLimitConfig, RateLimitsConfig};
use kms_core::{FixedWindowLimiter, RateDecision, RateLimiters};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_window_elapses_and_key_starts_fresh() {
    let limiter = FixedWindowLimiter::new("test", 3, Duration::from_millis(300), 100);

    for _ in 0..3 {
        assert!(limiter.check("caller").await.is_allowed());
    }
    match limiter.check("caller").await {
        RateDecision::Deny { retry_after_secs } => assert_eq!(retry_after_secs, 1),
        RateDecision::Allow => panic!("4th request should be denied"),
    }

    tokio::time::sleep(Duration::from_millis(350)).await;
    for _ in 0..3 {
        assert!(limiter.check("caller").await.is_allowed());
    }
    assert!(!limiter.check("caller").await.is_allowed());
}

#[tokio::test]
async fn test_concurrent_checks_never_exceed_max() {
    let limiter = Arc::new(FixedWindowLimiter::new("test", 25, Duration::from_secs(30), 100));

    let mut handles = Vec::new();
    for _ in 0..100 {
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move { limiter.check("shared").await.is_allowed() }));
    }

    let mut allowed = 0;
    for handle in handles {
        if handle.await.unwrap() {
            allowed += 1;
        }
    }
    assert_eq!(allowed, 25);
}

#[tokio::test]
async fn test_groups_from_config_are_independent() {
    let limiters = RateLimiters::from_config(&RateLimitsConfig {
        rotate: RateLimitConfig { window_ms: 10_000, max: 1 },
        crypto: RateLimitConfig { window_ms: 10_000, max: 2 },
        keys: RateLimitConfig { window_ms: 10_000, max: 1 },
        max_tracked_keys: 10,
    });

    assert!(limiters.rotate.check("caller").await.is_allowed());
    assert!(!limiters.rotate.check("caller").await.is_allowed());
    assert!(limiters.crypto.check("caller").await.is_allowed());
    assert!(limiters.crypto.check("caller").await.is_allowed());
    assert!(!limiters.crypto.check("caller").await.is_allowed());
    assert!(limiters.keys.check("caller").await.is_allowed());
}
