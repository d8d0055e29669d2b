//! pwstore - decrypt entries of a password store
//!
//! Decryption is delegated to an OpenPGP provider (gpg by default).

mod app;
mod clipboard;
mod gpg;
mod handlers;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pwstore_core::Preferences;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use app::App;

/// pwstore - a password store frontend
#[derive(Parser, Debug)]
#[command(name = "pwstore")]
#[command(author, version, about = "Decrypt entries of a password store")]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Path to the password store (overrides config)
    #[arg(short, long, value_name = "DIR")]
    store: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decrypt an entry and show it
    Show {
        /// Entry name, e.g. `social/facebook`
        name: String,
        /// Copy the password even if copy-on-decrypt is off
        #[arg(short = 'c', long)]
        clip: bool,
    },
    /// List the entries of the store
    List,
    /// Select the OpenPGP keys entries are encrypted to
    KeyIds,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout only carries entry content
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pwstore=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let config_path = match args.config.clone() {
        Some(path) => path,
        None => Preferences::config_path()?,
    };
    let mut preferences = Preferences::load(args.config)?;

    if let Some(store_path) = args.store {
        tracing::info!("Overriding store path from CLI: {}", store_path.display());
        preferences.store_path = store_path;
    }

    let mut app = App::new(preferences, config_path);
    match args.command {
        Command::Show { name, clip } => app.show(&name, clip).await,
        Command::List => app.list(),
        Command::KeyIds => app.select_key_ids().await,
    }
}
