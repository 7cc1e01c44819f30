use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use super::DatabaseError;
use super::models::{GuildConfig, MessagePair};
use crate::db::schema_sqlite::{guild_configs, message_pairs};
use crate::platform::MessageKey;

fn datetime_to_string(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Query(format!("invalid datetime format: {}", e)))
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = guild_configs)]
struct DbGuildConfig {
    guild_id: i64,
    settings: String,
    created_at: String,
    updated_at: String,
}

impl DbGuildConfig {
    fn to_guild_config(&self) -> Result<GuildConfig, DatabaseError> {
        let mut guild: GuildConfig = serde_json::from_str(&self.settings)?;
        guild.guild_id = self.guild_id as u64;
        guild.created_at = string_to_datetime(&self.created_at)?;
        guild.updated_at = string_to_datetime(&self.updated_at)?;
        Ok(guild)
    }
}

#[derive(Insertable)]
#[diesel(table_name = guild_configs)]
struct NewGuildConfig {
    guild_id: i64,
    settings: String,
    created_at: String,
    updated_at: String,
}

// SQLite INTEGER primary keys come back as i32.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = message_pairs)]
struct DbMessagePair {
    #[allow(dead_code)]
    id: i32,
    guild_id: i64,
    original_channel_id: i64,
    original_message_id: i64,
    mirror_channel_id: i64,
    mirror_message_id: i64,
    created_at: String,
}

impl DbMessagePair {
    fn to_message_pair(&self) -> Result<MessagePair, DatabaseError> {
        Ok(MessagePair {
            guild_id: self.guild_id as u64,
            original: MessageKey::new(
                self.original_channel_id as u64,
                self.original_message_id as u64,
            ),
            mirror: MessageKey::new(self.mirror_channel_id as u64, self.mirror_message_id as u64),
            created_at: string_to_datetime(&self.created_at)?,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = message_pairs)]
struct NewMessagePair {
    guild_id: i64,
    original_channel_id: i64,
    original_message_id: i64,
    mirror_channel_id: i64,
    mirror_message_id: i64,
    created_at: String,
}

pub(crate) fn establish_connection(path: &str) -> Result<SqliteConnection, DatabaseError> {
    SqliteConnection::establish(path).map_err(|e| DatabaseError::Connection(e.to_string()))
}

async fn with_connection<T, F>(db_path: Arc<String>, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut SqliteConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = establish_connection(&db_path)?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct SqliteStore {
    db_path: Arc<String>,
}

impl SqliteStore {
    pub fn new(db_path: Arc<String>) -> Self {
        Self { db_path }
    }
}

#[async_trait]
impl super::GuildStore for SqliteStore {
    async fn get_guild(&self, id: u64) -> Result<Option<GuildConfig>, DatabaseError> {
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::guild_configs::dsl::*;
            guild_configs
                .filter(guild_id.eq(id as i64))
                .select(DbGuildConfig::as_select())
                .first::<DbGuildConfig>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|row| row.to_guild_config())
                .transpose()
        })
        .await
    }

    async fn create_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        let row = NewGuildConfig {
            guild_id: guild.guild_id as i64,
            settings: serde_json::to_string(guild)?,
            created_at: datetime_to_string(&guild.created_at),
            updated_at: datetime_to_string(&guild.updated_at),
        };
        with_connection(self.db_path.clone(), move |conn| {
            diesel::insert_or_ignore_into(guild_configs::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn update_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        let id = guild.guild_id as i64;
        let new_settings = serde_json::to_string(guild)?;
        let now = datetime_to_string(&Utc::now());
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::guild_configs::dsl::*;
            diesel::update(guild_configs.filter(guild_id.eq(id)))
                .set((settings.eq(new_settings), updated_at.eq(now)))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete_guild(&self, id: u64) -> Result<(), DatabaseError> {
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::guild_configs::dsl::*;
            diesel::delete(guild_configs.filter(guild_id.eq(id as i64)))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl super::MessagePairStore for SqliteStore {
    async fn get_by_original(
        &self,
        original: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError> {
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::message_pairs::dsl::*;
            message_pairs
                .filter(original_channel_id.eq(original.channel_id as i64))
                .filter(original_message_id.eq(original.message_id as i64))
                .select(DbMessagePair::as_select())
                .first::<DbMessagePair>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|row| row.to_message_pair())
                .transpose()
        })
        .await
    }

    async fn get_by_mirror(
        &self,
        mirror: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError> {
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::message_pairs::dsl::*;
            message_pairs
                .filter(mirror_channel_id.eq(mirror.channel_id as i64))
                .filter(mirror_message_id.eq(mirror.message_id as i64))
                .select(DbMessagePair::as_select())
                .first::<DbMessagePair>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(|row| row.to_message_pair())
                .transpose()
        })
        .await
    }

    async fn create_pair(&self, pair: &MessagePair) -> Result<(), DatabaseError> {
        let row = NewMessagePair {
            guild_id: pair.guild_id as i64,
            original_channel_id: pair.original.channel_id as i64,
            original_message_id: pair.original.message_id as i64,
            mirror_channel_id: pair.mirror.channel_id as i64,
            mirror_message_id: pair.mirror.message_id as i64,
            created_at: datetime_to_string(&pair.created_at),
        };
        with_connection(self.db_path.clone(), move |conn| {
            diesel::insert_into(message_pairs::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete_by_original(&self, original: MessageKey) -> Result<(), DatabaseError> {
        with_connection(self.db_path.clone(), move |conn| {
            use crate::db::schema_sqlite::message_pairs::dsl::*;
            diesel::delete(
                message_pairs
                    .filter(original_channel_id.eq(original.channel_id as i64))
                    .filter(original_message_id.eq(original.message_id as i64)),
            )
            .execute(conn)
            .map(|_| ())
            .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}
