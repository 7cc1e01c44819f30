pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::memory::MemoryStore;
pub use self::models::{ChannelSettings, GuildConfig, MessagePair, Placement, StarboardRule};
pub use self::stores::{GuildStore, MessagePairStore};

pub mod error;
pub mod manager;
pub mod memory;
pub mod models;
#[cfg(feature = "postgres")]
pub mod schema;
pub mod stores;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub mod schema_sqlite;
