use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;

use super::DatabaseError;
use super::models::{GuildConfig, MessagePair};
use crate::db::manager::Pool;
use crate::db::schema::{guild_configs, message_pairs};
use crate::platform::MessageKey;

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = guild_configs)]
struct DbGuildConfig {
    guild_id: i64,
    settings: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DbGuildConfig> for GuildConfig {
    type Error = DatabaseError;

    fn try_from(value: DbGuildConfig) -> Result<Self, Self::Error> {
        let mut guild: GuildConfig = serde_json::from_str(&value.settings)?;
        guild.guild_id = value.guild_id as u64;
        guild.created_at = value.created_at;
        guild.updated_at = value.updated_at;
        Ok(guild)
    }
}

#[derive(Insertable)]
#[diesel(table_name = guild_configs)]
struct NewGuildConfig<'a> {
    guild_id: i64,
    settings: String,
    created_at: &'a DateTime<Utc>,
    updated_at: &'a DateTime<Utc>,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = message_pairs)]
struct DbMessagePair {
    #[allow(dead_code)]
    id: i64,
    guild_id: i64,
    original_channel_id: i64,
    original_message_id: i64,
    mirror_channel_id: i64,
    mirror_message_id: i64,
    created_at: DateTime<Utc>,
}

impl From<DbMessagePair> for MessagePair {
    fn from(value: DbMessagePair) -> Self {
        Self {
            guild_id: value.guild_id as u64,
            original: MessageKey::new(
                value.original_channel_id as u64,
                value.original_message_id as u64,
            ),
            mirror: MessageKey::new(
                value.mirror_channel_id as u64,
                value.mirror_message_id as u64,
            ),
            created_at: value.created_at,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = message_pairs)]
struct NewMessagePair<'a> {
    guild_id: i64,
    original_channel_id: i64,
    original_message_id: i64,
    mirror_channel_id: i64,
    mirror_message_id: i64,
    created_at: &'a DateTime<Utc>,
}

async fn with_connection<T, F>(pool: Pool, operation: F) -> Result<T, DatabaseError>
where
    T: Send + 'static,
    F: FnOnce(&mut PgConnection) -> Result<T, DatabaseError> + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|e| DatabaseError::Connection(e.to_string()))?;
        operation(&mut conn)
    })
    .await
    .map_err(|e| DatabaseError::Query(format!("database task failed: {e}")))?
}

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl super::GuildStore for PostgresStore {
    async fn get_guild(&self, id: u64) -> Result<Option<GuildConfig>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            use crate::db::schema::guild_configs::dsl::*;
            guild_configs
                .filter(guild_id.eq(id as i64))
                .select(DbGuildConfig::as_select())
                .first::<DbGuildConfig>(conn)
                .optional()
                .map_err(|e| DatabaseError::Query(e.to_string()))?
                .map(GuildConfig::try_from)
                .transpose()
        })
        .await
    }

    async fn create_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let guild = guild.clone();
        let encoded = serde_json::to_string(&guild)?;
        with_connection(pool, move |conn| {
            let row = NewGuildConfig {
                guild_id: guild.guild_id as i64,
                settings: encoded,
                created_at: &guild.created_at,
                updated_at: &guild.updated_at,
            };
            diesel::insert_into(guild_configs::table)
                .values(&row)
                .on_conflict(guild_configs::guild_id)
                .do_nothing()
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn update_guild(&self, guild: &GuildConfig) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let id = guild.guild_id as i64;
        let encoded = serde_json::to_string(guild)?;
        with_connection(pool, move |conn| {
            use crate::db::schema::guild_configs::dsl::*;
            diesel::update(guild_configs.filter(guild_id.eq(id)))
                .set((settings.eq(encoded), updated_at.eq(Utc::now())))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete_guild(&self, id: u64) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            use crate::db::schema::guild_configs::dsl::*;
            diesel::delete(guild_configs.filter(guild_id.eq(id as i64)))
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }
}

#[async_trait]
impl super::MessagePairStore for PostgresStore {
    async fn get_by_original(
        &self,
        original: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            use crate::db::schema::message_pairs::dsl::*;
            message_pairs
                .filter(original_channel_id.eq(original.channel_id as i64))
                .filter(original_message_id.eq(original.message_id as i64))
                .select(DbMessagePair::as_select())
                .first::<DbMessagePair>(conn)
                .optional()
                .map(|value| value.map(Into::into))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn get_by_mirror(
        &self,
        mirror: MessageKey,
    ) -> Result<Option<MessagePair>, DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            use crate::db::schema::message_pairs::dsl::*;
            message_pairs
                .filter(mirror_channel_id.eq(mirror.channel_id as i64))
                .filter(mirror_message_id.eq(mirror.message_id as i64))
                .select(DbMessagePair::as_select())
                .first::<DbMessagePair>(conn)
                .optional()
                .map(|value| value.map(Into::into))
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn create_pair(&self, pair: &MessagePair) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        let pair = pair.clone();
        with_connection(pool, move |conn| {
            let row = NewMessagePair {
                guild_id: pair.guild_id as i64,
                original_channel_id: pair.original.channel_id as i64,
                original_message_id: pair.original.message_id as i64,
                mirror_channel_id: pair.mirror.channel_id as i64,
                mirror_message_id: pair.mirror.message_id as i64,
                created_at: &pair.created_at,
            };
            diesel::insert_into(message_pairs::table)
                .values(&row)
                .execute(conn)
                .map(|_| ())
                .map_err(|e| DatabaseError::Query(e.to_string()))
        })
        .await
    }

    async fn delete_by_original(&self, original: MessageKey) -> Result<(), DatabaseError> {
        let pool = self.pool.clone();
        with_connection(pool, move |conn| {
            use crate::db::schema::message_pairs::dsl::*;
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
