pub use self::parser::{
    AuthConfig, CacheConfig, Config, DatabaseConfig, DbType, LoggingConfig, MediaConfig,
    TenorConfig,
};
pub use self::validator::ConfigError;

mod parser;
mod validator;
