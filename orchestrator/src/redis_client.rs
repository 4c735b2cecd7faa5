use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Shared Redis handle. The connection manager reconnects on its own and is
/// cheap to clone, so every call works on its own clone.
#[derive(Clone)]
pub struct RedisClient {
    connection: ConnectionManager,
}

impl RedisClient {
    pub async fn new(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let connection = client.get_tokio_connection_manager().await?;
        Ok(Self { connection })
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<()> {
        let mut connection = self.connection.clone();
        connection.publish::<_, _, ()>(channel, message).await?;
        Ok(())
    }

    pub async fn set_with_expiry<T: Serialize>(&self, key: &str, value: &T, expiry_secs: u64) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut connection = self.connection.clone();
        connection.set_ex::<_, _, ()>(key, json, expiry_secs).await?;
        Ok(())
    }

    pub async fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Result<Option<T>> {
        let mut connection = self.connection.clone();
        let result: Option<String> = connection.get(key).await?;
        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }
}

pub fn status_key(run_id: &str) -> String {
    format!("trip_plan:status:{run_id}")
}

pub const PROGRESS_CHANNEL: &str = "trip_plan:progress";
