use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::debug;

use crate::db::{DatabaseError, DatabaseManager, GuildConfig, GuildStore};

struct TimedValue<V> {
    value: V,
    inserted_at: Instant,
}

pub struct TimedCache<K, V> {
    map: HashMap<K, TimedValue<V>>,
    ttl: Duration,
}

impl<K, V> TimedCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            map: HashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.map
            .get(key)
            .filter(|tv| tv.inserted_at.elapsed() < self.ttl)
            .map(|tv| &tv.value)
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.map.insert(
            key,
            TimedValue {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.map.remove(key).map(|tv| tv.value)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn cleanup_expired(&mut self) {
        self.map.retain(|_, tv| tv.inserted_at.elapsed() < self.ttl);
    }
}

pub struct AsyncTimedCache<K, V> {
    inner: RwLock<TimedCache<K, V>>,
}

impl<K, V> AsyncTimedCache<K, V>
where
    K: std::hash::Hash + Eq + Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: RwLock::new(TimedCache::new(ttl)),
        }
    }

    pub async fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.read().await.get(key).cloned()
    }

    pub async fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.write().await;
        inner.cleanup_expired();
        inner.insert(key, value);
    }

    pub async fn remove(&self, key: &K) -> Option<V> {
        self.inner.write().await.remove(key)
    }
}

/// Read-through cache of guild settings in front of the store.
///
/// Unknown guilds are created with defaults on first reference.
pub struct GuildConfigCache {
    entries: AsyncTimedCache<u64, Arc<GuildConfig>>,
    store: Arc<DatabaseManager>,
}

impl GuildConfigCache {
    pub fn new(store: Arc<DatabaseManager>, ttl: Duration) -> Self {
        Self {
            entries: AsyncTimedCache::new(ttl),
            store,
        }
    }

    pub async fn get_or_create(&self, guild_id: u64) -> Result<Arc<GuildConfig>, DatabaseError> {
        if let Some(hit) = self.entries.get(&guild_id).await {
            return Ok(hit);
        }

        let guild = match self.store.get_guild(guild_id).await? {
            Some(guild) => guild,
            None => {
                debug!(guild_id, "creating default guild configuration");
                let guild = GuildConfig::new(guild_id);
                self.store.create_guild(&guild).await?;
                // another task may have won the insert
                self.store.get_guild(guild_id).await?.unwrap_or(guild)
            }
        };

        let guild = Arc::new(guild);
        self.entries.insert(guild_id, guild.clone()).await;
        Ok(guild)
    }

    /// Persists `guild` and drops the cached copy.
    pub async fn update(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        self.store.update_guild(guild).await?;
        self.invalidate(guild.guild_id).await;
        Ok(())
    }

    pub async fn invalidate(&self, guild_id: u64) {
        self.entries.remove(&guild_id).await;
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;

    use super::*;

    #[test]
    fn timed_cache_expires_entries() {
        let mut cache: TimedCache<&str, &str> = TimedCache::new(Duration::from_millis(50));
        cache.insert("key", "value");
        assert_eq!(cache.get(&"key"), Some(&"value"));
        sleep(Duration::from_millis(60));
        assert_eq!(cache.get(&"key"), None);
    }

    #[test]
    fn timed_cache_cleanup_removes_expired() {
        let mut cache: TimedCache<&str, &str> = TimedCache::new(Duration::from_millis(50));
        cache.insert("key1", "value1");
        sleep(Duration::from_millis(60));
        cache.insert("key2", "value2");
        cache.cleanup_expired();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(&"key2"), Some("value2"));
    }

    #[tokio::test]
    async fn unknown_guild_is_created_with_defaults() {
        let store = Arc::new(DatabaseManager::in_memory(Duration::from_secs(5)));
        let cache = GuildConfigCache::new(store.clone(), Duration::from_secs(60));

        let guild = cache.get_or_create(9).await.unwrap();
        assert_eq!(guild.emote, "⭐");
        assert!(store.get_guild(9).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn update_invalidates_cached_copy() {
        let store = Arc::new(DatabaseManager::in_memory(Duration::from_secs(5)));
        let cache = GuildConfigCache::new(store.clone(), Duration::from_secs(60));

        let mut guild = (*cache.get_or_create(9).await.unwrap()).clone();
        guild.selfstar = true;

        // a write that bypasses the cache stays invisible until invalidation
        store.update_guild(&guild).await.unwrap();
        assert!(!cache.get_or_create(9).await.unwrap().selfstar);

        cache.update(&guild).await.unwrap();
        assert!(cache.get_or_create(9).await.unwrap().selfstar);
    }
}
