use redis::{aio::MultiplexedConnection, AsyncCommands, Client};
use std::time::Duration;
use uuid::Uuid;

use crate::error::AppResult;

pub const CHANGES_CHANNEL: &str = "realtime:changes";

#[derive(Clone)]
pub struct RedisClient {
    client: Client,
    conn: MultiplexedConnection,
}

impl RedisClient {
    pub async fn new(url: &str) -> AppResult<Self> {
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { client, conn })
    }

    // Profile cache
    pub async fn set_profile(&self, profile_id: &str, json: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("profile:{}", profile_id);
        let _: () = conn.set_ex(&key, json, ttl.as_secs()).await?;
        Ok(())
    }

    pub async fn get_profile(&self, profile_id: &str) -> AppResult<Option<String>> {
        let mut conn = self.conn.clone();
        let key = format!("profile:{}", profile_id);
        let value: Option<String> = conn.get(&key).await?;
        Ok(value)
    }

    pub async fn invalidate_profile(&self, profile_id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("profile:{}", profile_id);
        let _: () = conn.del(&key).await?;
        Ok(())
    }

    // Favorite connections
    pub async fn get_favorites(&self, user_id: &str) -> AppResult<Vec<Uuid>> {
        let mut conn = self.conn.clone();
        let key = format!("favorites:{}", user_id);
        let members: Vec<String> = conn.smembers(&key).await?;
        Ok(members
            .iter()
            .filter_map(|m| Uuid::parse_str(m).ok())
            .collect())
    }

    pub async fn add_favorite(&self, user_id: &str, connection_id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("favorites:{}", user_id);
        let _: () = conn.sadd(&key, connection_id).await?;
        Ok(())
    }

    pub async fn remove_favorite(&self, user_id: &str, connection_id: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let key = format!("favorites:{}", user_id);
        let _: () = conn.srem(&key, connection_id).await?;
        Ok(())
    }

    // Pub/Sub for realtime
    pub async fn publish_change(&self, event: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.publish(CHANGES_CHANNEL, event).await?;
        Ok(())
    }

    pub async fn subscribe_changes(&self) -> AppResult<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(CHANGES_CHANNEL).await?;
        Ok(pubsub)
    }

    pub async fn publish_notification(&self, user_id: &str, message: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let channel = format!("notifications:{}", user_id);
        let _: () = conn.publish(&channel, message).await?;
        Ok(())
    }

    pub async fn subscribe_notifications(&self, user_id: &str) -> AppResult<redis::aio::PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        let channel = format!("notifications:{}", user_id);
        pubsub.subscribe(&channel).await?;
        Ok(pubsub)
    }
}
