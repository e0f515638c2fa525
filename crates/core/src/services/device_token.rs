//! Device push address lookup.
//!
//! Addresses are registered by the client-facing API (outside this crate)
//! into one Redis set per member.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use fred::clients::Client as RedisClient;
use fred::interfaces::SetsInterface;
use tracing::debug;
use wakeup_common::{AppError, AppResult};

/// Key-value lookup of a member's device push addresses.
#[async_trait]
pub trait DeviceTokenStore: Send + Sync {
    /// All push addresses registered for `member_id`. Empty if none.
    async fn device_addresses(&self, member_id: &str) -> AppResult<HashSet<String>>;

    /// Forget one push address of `member_id`.
    async fn remove_address(&self, member_id: &str, address: &str) -> AppResult<()>;
}

/// [`DeviceTokenStore`] backed by Redis sets.
#[derive(Clone)]
pub struct RedisDeviceTokenStore {
    redis: Arc<RedisClient>,
    prefix: String,
}

impl RedisDeviceTokenStore {
    #[must_use]
    pub fn new(redis: Arc<RedisClient>, prefix: impl Into<String>) -> Self {
        Self {
            redis,
            prefix: prefix.into(),
        }
    }

    fn key(&self, member_id: &str) -> String {
        token_key(&self.prefix, member_id)
    }
}

/// Redis key of a member's push address set.
#[must_use]
pub fn token_key(prefix: &str, member_id: &str) -> String {
    format!("{prefix}:push_tokens:{member_id}")
}

#[async_trait]
impl DeviceTokenStore for RedisDeviceTokenStore {
    async fn device_addresses(&self, member_id: &str) -> AppResult<HashSet<String>> {
        self.redis
            .smembers::<HashSet<String>, _>(self.key(member_id))
            .await
            .map_err(|e| AppError::Redis(e.to_string()))
    }

    async fn remove_address(&self, member_id: &str, address: &str) -> AppResult<()> {
        let removed: i64 = self
            .redis
            .srem(self.key(member_id), address.to_string())
            .await
            .map_err(|e| AppError::Redis(e.to_string()))?;

        debug!(member_id = %member_id, removed, "Removed push address");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_key() {
        assert_eq!(token_key("wakeup", "m1"), "wakeup:push_tokens:m1");
    }
}
