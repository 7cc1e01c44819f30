use async_trait::async_trait;

use super::DatabaseError;
use super::models::{GuildConfig, MessagePair};
use crate::platform::MessageKey;

#[async_trait]
pub trait GuildStore: Send + Sync {
    async fn get_guild(&self, guild_id: u64) -> Result<Option<GuildConfig>, DatabaseError>;
    /// Inserts the guild unless a row for its id already exists.
    async fn create_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError>;
    async fn update_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError>;
    async fn delete_guild(&self, guild_id: u64) -> Result<(), DatabaseError>;
}

#[async_trait]
pub trait MessagePairStore: Send + Sync {
    async fn get_by_original(
        &self,
        original: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError>;
    async fn get_by_mirror(&self, mirror: MessageKey)
    -> Result<Option<MessagePair>, DatabaseError>;
    async fn create_pair(&self, pair: &MessagePair) -> Result<(), DatabaseError>;
    async fn delete_by_original(&self, original: MessageKey) -> Result<(), DatabaseError>;
}
