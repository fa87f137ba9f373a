//! Integration tests for RedisTenantLimiter
//!
//! Run with: cargo test -p flowq-worker --test redis_limiter_test -- --ignored
//!
//! Requirements:
//! - Redis running with REDIS_URL set or redis://localhost:6379

#![cfg(feature = "redis")]

use std::time::Duration;

use flowq_worker::{LimiterConfig, RedisTenantLimiter, TenantLimiter};
use uuid::Uuid;

fn get_redis_url() -> String {
    std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
}

async fn limiter(config: LimiterConfig) -> RedisTenantLimiter {
    RedisTenantLimiter::connect(&get_redis_url(), config)
        .await
        .expect("Failed to connect to Redis. Set REDIS_URL or ensure redis is running.")
}

fn tenant() -> String {
    format!("test-{}", Uuid::now_v7())
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_acquire_up_to_limit_then_release() {
    let limiter = limiter(LimiterConfig::new(2)).await;
    let tenant = tenant();

    assert!(limiter.acquire(&tenant, "e1").await.unwrap());
    assert!(limiter.acquire(&tenant, "e2").await.unwrap());
    assert!(!limiter.acquire(&tenant, "e3").await.unwrap());
    assert_eq!(limiter.current_count(&tenant).await.unwrap(), 2);

    // The holder may re-acquire its own slot
    assert!(limiter.acquire(&tenant, "e1").await.unwrap());
    assert_eq!(limiter.current_count(&tenant).await.unwrap(), 2);

    limiter.release(&tenant, "e1").await.unwrap();
    assert!(limiter.acquire(&tenant, "e3").await.unwrap());

    limiter.release(&tenant, "e2").await.unwrap();
    limiter.release(&tenant, "e3").await.unwrap();
    assert_eq!(limiter.current_count(&tenant).await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_stale_slots_stop_counting() {
    let limiter = limiter(LimiterConfig::new(1).with_stale_after(Duration::from_millis(200))).await;
    let tenant = tenant();

    assert!(limiter.acquire(&tenant, "crashed").await.unwrap());
    assert!(!limiter.acquire(&tenant, "e2").await.unwrap());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(limiter.acquire(&tenant, "e2").await.unwrap());
    assert_eq!(limiter.current_count(&tenant).await.unwrap(), 1);

    limiter.release(&tenant, "e2").await.unwrap();
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_ping() {
    limiter(LimiterConfig::default()).await.ping().await.unwrap();
}
