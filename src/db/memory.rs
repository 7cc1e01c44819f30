use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::DatabaseError;
use super::models::{GuildConfig, MessagePair};
use crate::platform::MessageKey;

#[derive(Default)]
struct Tables {
    guilds: HashMap<u64, GuildConfig>,
    pairs: HashMap<MessageKey, MessagePair>,
    mirrors: HashMap<MessageKey, MessageKey>,
}

/// Process-local store with the same contract as the diesel backends.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pair_count(&self) -> usize {
        self.tables.lock().pairs.len()
    }
}

#[async_trait]
impl super::GuildStore for MemoryStore {
    async fn get_guild(&self, guild_id: u64) -> Result<Option<GuildConfig>, DatabaseError> {
        Ok(self.tables.lock().guilds.get(&guild_id).cloned())
    }

    async fn create_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        self.tables
            .lock()
            .guilds
            .entry(guild.guild_id)
            .or_insert_with(|| guild.clone());
        Ok(())
    }

    async fn update_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock();
        if let Some(existing) = tables.guilds.get_mut(&guild.guild_id) {
            *existing = guild.clone();
        }
        Ok(())
    }

    async fn delete_guild(&self, guild_id: u64) -> Result<(), DatabaseError> {
        self.tables.lock().guilds.remove(&guild_id);
        Ok(())
    }
}

#[async_trait]
impl super::MessagePairStore for MemoryStore {
    async fn get_by_original(
        &self,
        original: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError> {
        Ok(self.tables.lock().pairs.get(&original).cloned())
    }

    async fn get_by_mirror(
        &self,
        mirror: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError> {
        let tables = self.tables.lock();
        Ok(tables
            .mirrors
            .get(&mirror)
            .and_then(|original| tables.pairs.get(original))
            .cloned())
    }

    async fn create_pair(&self, pair: &MessagePair) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock();
        if tables.pairs.contains_key(&pair.original) {
            return Err(DatabaseError::Query(format!(
                "message pair for {} already exists",
                pair.original
            )));
        }
        tables.mirrors.insert(pair.mirror, pair.original);
        tables.pairs.insert(pair.original, pair.clone());
        Ok(())
    }

    async fn delete_by_original(&self, original: MessageKey) -> Result<(), DatabaseError> {
        let mut tables = self.tables.lock();
        if let Some(pair) = tables.pairs.remove(&original) {
            tables.mirrors.remove(&pair.mirror);
        }
        Ok(())
    }
}
