use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DatabaseError;
use crate::gif::GifError;
use crate::media::FetchError;

/// Failures surfaced at the binary edge, before `anyhow` takes over.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Media client error: {0}")]
    Media(#[from] FetchError),

    #[error("GIF client error: {0}")]
    Gif(#[from] GifError),

    #[error("Gateway error: {0}")]
    Gateway(String),
}

impl From<serenity::Error> for AppError {
    fn from(err: serenity::Error) -> Self {
        AppError::Gateway(err.to_string())
    }
}
