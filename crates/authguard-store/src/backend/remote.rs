//! Remote connection seam and its Redis implementation.

use async_trait::async_trait;
use deadpool_redis::{Pool, PoolConfig, PoolError, Runtime};
use redis::{AsyncCommands, RedisError};

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};

/// SCAN batch size hint.
const SCAN_COUNT: usize = 500;

/// Raw commands the distributed backend needs from a remote cache.
///
/// Implementations must report unreachable/dropped/timed-out connections as
/// [`StoreError::Connection`] so the backend can start reconnecting; every
/// other failure is an operation error.
#[async_trait]
pub trait RemoteConnection: Send + Sync {
    /// Checks that the remote is reachable.
    async fn ping(&self) -> StoreResult<()>;

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Sets `key` with an expiry in whole seconds.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()>;

    async fn del(&self, key: &str) -> StoreResult<()>;

    /// Returns every key starting with `prefix`.
    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Endpoint description for logs, without credentials.
    fn endpoint(&self) -> String;
}

/// Redis connection backed by a deadpool pool.
#[derive(Clone)]
pub struct RedisConnection {
    pool: Pool,
    endpoint: String,
}

impl RedisConnection {
    /// Builds the pool. No connection is opened until first use.
    pub fn new(url: &str, config: &StoreConfig) -> StoreResult<Self> {
        let mut redis_config = deadpool_redis::Config::from_url(url);

        let mut pool_config = PoolConfig::new(config.pool_size);
        pool_config.timeouts.wait = Some(config.timeout());
        pool_config.timeouts.create = Some(config.timeout());
        pool_config.timeouts.recycle = Some(config.timeout());
        redis_config.pool = Some(pool_config);

        let pool = redis_config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::configuration(format!("failed to create Redis pool: {e}")))?;

        Ok(Self {
            pool,
            endpoint: redact_url(url),
        })
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(pool_error)
    }
}

#[async_trait]
impl RemoteConnection for RedisConnection {
    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| classify("ping", e))?;
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        conn.get::<_, Option<String>>(key)
            .await
            .map_err(|e| classify("get", e))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs)
            .await
            .map_err(|e| classify("set_ex", e))
    }

    async fn del(&self, key: &str) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        conn.del::<_, ()>(key)
            .await
            .map_err(|e| classify("del", e))
    }

    async fn scan_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let mut conn = self.conn().await?;
        let pattern = format!("{}*", escape_glob(prefix));
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await
                .map_err(|e| classify("scan", e))?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

fn classify(operation: &'static str, err: RedisError) -> StoreError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        StoreError::connection(format!("{operation}: {err}"))
    } else {
        StoreError::operation(operation, err.to_string())
    }
}

fn pool_error(err: PoolError) -> StoreError {
    match err {
        PoolError::Backend(e) => classify("connect", e),
        other => StoreError::connection(format!("failed to get Redis connection: {other}")),
    }
}

/// Escapes Redis glob metacharacters so a prefix matches literally.
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Hides the userinfo part of a connection URL.
fn redact_url(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***@{}", &url[..scheme_end], &url[at + 1..])
        }
        _ => url.to_string(),
    }
}
