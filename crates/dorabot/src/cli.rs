//! Command-line flags for the binary entrypoint (§1.1 ambient CLI section).

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "doradura", about = "Telegram bot for downloading and converting shared media")]
pub struct Cli {
    /// Override the sqlite database path (defaults to the loaded config's).
    #[arg(long)]
    pub database_path: Option<PathBuf>,

    /// Override the downloads root (defaults to the loaded config's).
    #[arg(long)]
    pub download_dir: Option<PathBuf>,

    /// Apply pending migrations and exit without starting the dispatcher.
    #[arg(long)]
    pub migrate_only: bool,
}
