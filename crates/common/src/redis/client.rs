use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use tracing::debug;

/// Shared Redis connection; cloning is cheap and every clone multiplexes the same socket.
#[derive(Clone)]
pub struct RedisClient {
    manager: ConnectionManager,
}

impl RedisClient {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let manager = ConnectionManager::new(client)
            .await
            .context("failed to connect to redis")?;
        debug!("redis connection established");
        Ok(Self { manager })
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    pub fn connection(&self) -> ConnectionManager {
        self.manager.clone()
    }
}
