#![forbid(unsafe_code)]
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use serenity::Client;
use serenity::http::Http;
use tracing::{error, info};

mod cache;
mod cli;
mod config;
mod db;
mod gif;
mod media;
mod platform;
mod starboard;
mod utils;

use cache::GuildConfigCache;
use cli::{Cli, Commands};
use config::Config;
use db::{DatabaseManager, GuildConfig, GuildStore};
use gif::TenorClient;
use media::MediaFetcher;
use platform::discord::{DiscordPlatform, StarboardHandler};
use starboard::{ContentExtractor, StarboardEngine};
use utils::AppError;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load_from_file(&cli.config)?;
    utils::logging::init_tracing(&config.logging);

    match cli.command {
        Some(Commands::ValidateConfig) => {
            info!("configuration at {} is valid", cli.config.display());
        }
        Some(Commands::Migrate) => {
            let db_manager = DatabaseManager::new(&config.database).await?;
            db_manager.migrate().await?;
            info!("database schema is up to date");
        }
        Some(Commands::ShowGuild { guild }) => {
            let db_manager = DatabaseManager::new(&config.database).await?;
            let settings = db_manager
                .get_guild(guild)
                .await?
                .unwrap_or_else(|| GuildConfig::new(guild));
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        None => run(config).await?,
    }

    Ok(())
}

async fn run(config: Config) -> Result<(), AppError> {
    info!("starboard starting up");

    let db_manager = Arc::new(DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    let guilds = Arc::new(GuildConfigCache::new(
        db_manager.clone(),
        Duration::from_secs(config.cache.guild_ttl_secs),
    ));
    let extractor = ContentExtractor::new(
        Arc::new(MediaFetcher::new(&config.media)?),
        Arc::new(TenorClient::new(&config.tenor, &config.media)?),
    );

    let http = Arc::new(Http::new(&config.auth.bot_token));
    let engine = Arc::new(StarboardEngine::new(
        db_manager,
        guilds,
        Arc::new(DiscordPlatform::new(http)),
        extractor,
    ));

    let mut client = Client::builder(&config.auth.bot_token, StarboardHandler::intents())
        .event_handler(StarboardHandler::new(engine))
        .await?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl+C: {}", e);
            return;
        }
        info!("received Ctrl+C, beginning shutdown");
        shard_manager.shutdown_all().await;
    });

    client.start().await?;

    info!("starboard shutting down");
    Ok(())
}
