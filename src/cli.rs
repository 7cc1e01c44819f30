use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "starboard-bridge")]
#[command(about = "Discord starboard service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[arg(short, long, env = "CONFIG_PATH", default_value = "config.yaml")]
    pub config: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(about = "Validate the configuration file")]
    ValidateConfig,

    #[command(about = "Create the database tables if they are missing")]
    Migrate,

    #[command(about = "Print the stored (or default) configuration of a guild as JSON")]
    ShowGuild {
        #[arg(short, long, help = "Guild ID")]
        guild: u64,
    },
}
