use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(any(feature = "postgres", feature = "sqlite"))]
use diesel::RunQueryDsl;
#[cfg(feature = "postgres")]
use diesel::pg::PgConnection;
#[cfg(feature = "postgres")]
use diesel::r2d2::{self, ConnectionManager};
use tracing::debug;

use crate::config::{DatabaseConfig as ConfigDatabaseConfig, DbType as ConfigDbType};
use crate::db::memory::MemoryStore;
#[cfg(feature = "postgres")]
use crate::db::postgres::PostgresStore;
#[cfg(feature = "sqlite")]
use crate::db::sqlite::SqliteStore;
use crate::db::{DatabaseError, GuildConfig, GuildStore, MessagePair, MessagePairStore};
use crate::platform::MessageKey;

#[cfg(feature = "postgres")]
pub type Pool = r2d2::Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(60);

/// Owns the selected backend and bounds every store call by a deadline.
#[derive(Clone)]
pub struct DatabaseManager {
    #[cfg(feature = "postgres")]
    postgres_pool: Option<Pool>,
    #[cfg(feature = "sqlite")]
    sqlite_path: Option<String>,
    guild_store: Arc<dyn GuildStore>,
    message_store: Arc<dyn MessagePairStore>,
    db_type: DbType,
    timeout: Duration,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DbType {
    Postgres,
    Sqlite,
    Memory,
}

impl From<ConfigDbType> for DbType {
    fn from(value: ConfigDbType) -> Self {
        match value {
            ConfigDbType::Postgres => DbType::Postgres,
            ConfigDbType::Sqlite => DbType::Sqlite,
        }
    }
}

impl DatabaseManager {
    pub async fn new(config: &ConfigDatabaseConfig) -> Result<Self, DatabaseError> {
        let db_type = DbType::from(config.db_type());
        let timeout = Duration::from_secs(config.timeout_secs);

        match db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => {
                let manager = ConnectionManager::<PgConnection>::new(config.connection_string());

                let pool = r2d2::Pool::builder()
                    .max_size(config.max_connections().unwrap_or(10))
                    .min_idle(Some(config.min_connections().unwrap_or(1)))
                    .build(manager)
                    .map_err(|e| DatabaseError::Connection(e.to_string()))?;

                let store = Arc::new(PostgresStore::new(pool.clone()));

                Ok(Self {
                    postgres_pool: Some(pool),
                    #[cfg(feature = "sqlite")]
                    sqlite_path: None,
                    guild_store: store.clone(),
                    message_store: store,
                    db_type,
                    timeout,
                })
            }
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => {
                let path = config.sqlite_path().ok_or_else(|| {
                    DatabaseError::Connection("sqlite path is not configured".to_string())
                })?;
                let store = Arc::new(SqliteStore::new(Arc::new(path.clone())));

                Ok(Self {
                    #[cfg(feature = "postgres")]
                    postgres_pool: None,
                    sqlite_path: Some(path),
                    guild_store: store.clone(),
                    message_store: store,
                    db_type,
                    timeout,
                })
            }
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Connection(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Connection(
                "SQLite feature not enabled".to_string(),
            )),
            DbType::Memory => Ok(Self::in_memory(timeout)),
        }
    }

    pub fn in_memory(timeout: Duration) -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), timeout)
    }

    /// Wraps a store that implements both halves of the contract.
    pub fn with_store<S>(store: Arc<S>, timeout: Duration) -> Self
    where
        S: GuildStore + MessagePairStore + 'static,
    {
        Self {
            #[cfg(feature = "postgres")]
            postgres_pool: None,
            #[cfg(feature = "sqlite")]
            sqlite_path: None,
            guild_store: store.clone(),
            message_store: store,
            db_type: DbType::Memory,
            timeout,
        }
    }

    pub fn db_type(&self) -> DbType {
        self.db_type
    }

    pub async fn migrate(&self) -> Result<(), DatabaseError> {
        match self.db_type {
            #[cfg(feature = "postgres")]
            DbType::Postgres => match self.postgres_pool.as_ref() {
                Some(pool) => Self::migrate_postgres(pool).await,
                None => Err(DatabaseError::Migration("no postgres pool".to_string())),
            },
            #[cfg(feature = "sqlite")]
            DbType::Sqlite => match self.sqlite_path.as_ref() {
                Some(path) => Self::migrate_sqlite(path).await,
                None => Err(DatabaseError::Migration("no sqlite path".to_string())),
            },
            #[cfg(not(feature = "postgres"))]
            DbType::Postgres => Err(DatabaseError::Migration(
                "PostgreSQL feature not enabled".to_string(),
            )),
            #[cfg(not(feature = "sqlite"))]
            DbType::Sqlite => Err(DatabaseError::Migration(
                "SQLite feature not enabled".to_string(),
            )),
            DbType::Memory => Ok(()),
        }
    }

    #[cfg(feature = "postgres")]
    async fn migrate_postgres(pool: &Pool) -> Result<(), DatabaseError> {
        let pool = pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| DatabaseError::Connection(e.to_string()))?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS guild_configs (
                    guild_id BIGINT PRIMARY KEY,
                    settings TEXT NOT NULL,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW()
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS message_pairs (
                    id BIGSERIAL PRIMARY KEY,
                    guild_id BIGINT NOT NULL,
                    original_channel_id BIGINT NOT NULL,
                    original_message_id BIGINT NOT NULL,
                    mirror_channel_id BIGINT NOT NULL,
                    mirror_message_id BIGINT NOT NULL,
                    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT NOW(),
                    UNIQUE (original_channel_id, original_message_id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_message_pairs_mirror ON message_pairs(mirror_channel_id, mirror_message_id)",
                "CREATE INDEX IF NOT EXISTS idx_message_pairs_guild ON message_pairs(guild_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    #[cfg(feature = "sqlite")]
    async fn migrate_sqlite(path: &str) -> Result<(), DatabaseError> {
        let path = path.to_string();
        tokio::task::spawn_blocking(move || {
            let mut conn = crate::db::sqlite::establish_connection(&path)?;

            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS guild_configs (
                    guild_id BIGINT PRIMARY KEY NOT NULL,
                    settings TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS message_pairs (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    guild_id BIGINT NOT NULL,
                    original_channel_id BIGINT NOT NULL,
                    original_message_id BIGINT NOT NULL,
                    mirror_channel_id BIGINT NOT NULL,
                    mirror_message_id BIGINT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE (original_channel_id, original_message_id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_message_pairs_mirror ON message_pairs(mirror_channel_id, mirror_message_id)",
                "CREATE INDEX IF NOT EXISTS idx_message_pairs_guild ON message_pairs(guild_id)",
            ];

            for statement in statements {
                diesel::sql_query(statement)
                    .execute(&mut conn)
                    .map_err(|e| DatabaseError::Migration(e.to_string()))?;
            }

            Ok(())
        })
        .await
        .map_err(|e| DatabaseError::Migration(format!("migration task failed: {e}")))?
    }

    async fn with_deadline<T, F>(&self, operation: &str, fut: F) -> Result<T, DatabaseError>
    where
        F: Future<Output = Result<T, DatabaseError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => {
                debug!("store call {} exceeded {:?}", operation, self.timeout);
                Err(DatabaseError::Timeout(format!(
                    "{} exceeded {}s",
                    operation,
                    self.timeout.as_secs()
                )))
            }
        }
    }
}

#[async_trait]
impl GuildStore for DatabaseManager {
    async fn get_guild(&self, guild_id: u64) -> Result<Option<GuildConfig>, DatabaseError> {
        self.with_deadline("get_guild", self.guild_store.get_guild(guild_id))
            .await
    }

    async fn create_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        self.with_deadline("create_guild", self.guild_store.create_guild(guild))
            .await
    }

    async fn update_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        self.with_deadline("update_guild", self.guild_store.update_guild(guild))
            .await
    }

    async fn delete_guild(&self, guild_id: u64) -> Result<(), DatabaseError> {
        self.with_deadline("delete_guild", self.guild_store.delete_guild(guild_id))
            .await
    }
}

#[async_trait]
impl MessagePairStore for DatabaseManager {
    async fn get_by_original(
        &self,
        original: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError> {
        self.with_deadline(
            "get_by_original",
            self.message_store.get_by_original(original),
        )
        .await
    }

    async fn get_by_mirror(
        &self,
        mirror: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError> {
        self.with_deadline("get_by_mirror", self.message_store.get_by_mirror(mirror))
            .await
    }

    async fn create_pair(&self, pair: &MessagePair) -> Result<(), DatabaseError> {
        self.with_deadline("create_pair", self.message_store.create_pair(pair))
            .await
    }

    async fn delete_by_original(&self, original: MessageKey) -> Result<(), DatabaseError> {
        self.with_deadline(
            "delete_by_original",
            self.message_store.delete_by_original(original),
        )
        .await
    }
}
