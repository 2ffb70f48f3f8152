//! Integration tests for the Redis-backed store.
//!
//! Tests use testcontainers to spin up a real Redis instance and are ignored
//! by default. Run with `cargo test -- --ignored` on a host with Docker.

use authguard_store::{
    BackendMode, FallbackController, KvTtlStore, RedisConnection, RemoteConnection, StoreConfig,
    system_clock,
};
use std::time::Duration;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");

            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{}", host_port);

            (container, url)
        })
        .await;

    url.clone()
}

fn config(url: String) -> StoreConfig {
    StoreConfig {
        remote_store_url: Some(url),
        ..StoreConfig::default()
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_connection_roundtrip() {
    let url = get_redis_url().await;
    let conn = RedisConnection::new(&url, &config(url.clone())).expect("pool");

    conn.ping().await.expect("ping");
    conn.set_ex("it:conn:key", "value", 60).await.expect("set");
    assert_eq!(conn.get("it:conn:key").await.unwrap().as_deref(), Some("value"));

    conn.del("it:conn:key").await.expect("del");
    assert!(conn.get("it:conn:key").await.unwrap().is_none());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_scan_prefix() {
    let url = get_redis_url().await;
    let conn = RedisConnection::new(&url, &config(url.clone())).expect("pool");

    for i in 0..25 {
        conn.set_ex(&format!("it:scan:{i}"), "1", 60).await.unwrap();
    }
    conn.set_ex("it:other:0", "1", 60).await.unwrap();

    let keys = conn.scan_prefix("it:scan:").await.unwrap();
    assert_eq!(keys.len(), 25);
    assert!(keys.iter().all(|k| k.starts_with("it:scan:")));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_controller_uses_redis() {
    let url = get_redis_url().await;
    let controller = FallbackController::from_config(&config(url), system_clock());

    controller
        .set_with_ttl("it:controller:key", "v", Duration::from_secs(60))
        .await
        .unwrap();

    assert_eq!(controller.mode(), BackendMode::Distributed);
    assert_eq!(
        controller.get("it:controller:key").await.unwrap().as_deref(),
        Some("v")
    );

    controller.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_redis_expires_entries() {
    let url = get_redis_url().await;
    let controller = FallbackController::from_config(&config(url), system_clock());

    controller
        .set_with_ttl("it:expiring", "v", Duration::from_secs(1))
        .await
        .unwrap();
    assert!(controller.get("it:expiring").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(controller.get("it:expiring").await.unwrap().is_none());

    controller.shutdown().await;
}
