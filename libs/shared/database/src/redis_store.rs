use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, Runtime};
use redis::Script;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

use crate::error::StoreError;
use crate::kv::KeyValueStore;

const COMPARE_AND_DELETE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

const COMPARE_AND_EXTEND: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("PEXPIRE", KEYS[1], ARGV[2])
else
    return 0
end
"#;

struct ActivePool {
    pool: Pool,
    url: String,
}

pub struct RedisStore {
    name: String,
    primary_url: String,
    fallback_url: Option<String>,
    key_prefix: String,
    active: RwLock<ActivePool>,
}

impl RedisStore {
    pub async fn new(config: &AppConfig) -> Result<Self, StoreError> {
        let primary_url = config
            .redis_url
            .clone()
            .ok_or_else(|| StoreError::Unavailable("REDIS_URL not configured".to_string()))?;

        Self::connect("redis", primary_url, config.redis_fallback_url.clone(), "correlation-monitor:").await
    }

    /// Connects to the primary endpoint, falling back to the secondary one
    /// when the primary does not answer `PING`.
    pub async fn connect(
        name: impl Into<String>,
        primary_url: String,
        fallback_url: Option<String>,
        key_prefix: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let active = Self::open_first_reachable(&primary_url, fallback_url.as_deref()).await?;
        let name = name.into();
        info!(store = %name, url = %active.url, "Redis store initialized successfully");

        Ok(Self {
            name,
            primary_url,
            fallback_url,
            key_prefix: key_prefix.into(),
            active: RwLock::new(active),
        })
    }

    async fn open_first_reachable(primary: &str, fallback: Option<&str>) -> Result<ActivePool, StoreError> {
        match Self::open_pool(primary).await {
            Ok(pool) => Ok(pool),
            Err(primary_err) => {
                let Some(fallback) = fallback else {
                    return Err(primary_err);
                };
                warn!("Primary Redis endpoint unreachable ({}), trying fallback", primary_err);
                Self::open_pool(fallback).await
            }
        }
    }

    async fn open_pool(url: &str) -> Result<ActivePool, StoreError> {
        let pool = Config::from_url(url).create_pool(Some(Runtime::Tokio1))?;
        let mut conn = pool.get().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;

        Ok(ActivePool {
            pool,
            url: url.to_string(),
        })
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        let pool = self.active.read().await.pool.clone();
        Ok(pool.get().await?)
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    pub async fn active_url(&self) -> String {
        self.active.read().await.url.clone()
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KeyValueStore for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection().await?;
        let value: Option<String> = redis::cmd("GET").arg(self.key(key)).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key)).arg(value);
        if let Some(ttl) = ttl {
            cmd.arg("PX").arg(ttl_millis(ttl));
        }
        let _: () = cmd.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: i64 = redis::cmd("DEL").arg(self.key(key)).query_async(&mut conn).await?;
        Ok(removed > 0)
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(self.key(key))
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: i64 = Script::new(COMPARE_AND_DELETE)
            .key(self.key(key))
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(removed == 1)
    }

    async fn extend_if_equals(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let extended: i64 = Script::new(COMPARE_AND_EXTEND)
            .key(self.key(key))
            .arg(expected)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await?;
        Ok(extended == 1)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(store = %self.name))]
    async fn reconnect(&self) -> Result<(), StoreError> {
        let fresh = Self::open_first_reachable(&self.primary_url, self.fallback_url.as_deref()).await?;
        debug!(url = %fresh.url, "Redis store reconnected");

        let mut active = self.active.write().await;
        *active = fresh;
        Ok(())
    }
}
