mod app;
mod config;
mod error;
mod expansion;
mod filter;
mod mdns;
mod session;
mod settings;
mod sizing;
mod tree;
mod ui;

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tokio::sync::mpsc;
use anyhow::{Context, Result};
use crate::app::App;
use crate::config::Config;
use crate::mdns::MdnsDiscovery;
use crate::settings::SettingsDb;
use crate::sizing::SizingPolicy;

#[tokio::main]
async fn main() -> Result<()> {
    // Load config
    let config_path = std::env::args().nth(1);
    let config = Config::resolve(config_path.as_deref())
        .context("Failed to load configuration")?;

    // The terminal owns stdout, so logs go to a file
    init_tracing(&config.log.file)?;

    tracing::info!("Starting zeroconf-browser");

    let settings = SettingsDb::open(&config.settings.db_path)?;
    tracing::info!("Opened settings at {:?}", config.settings.db_path);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let app = App::new(
        MdnsDiscovery::new(&config.discovery),
        Box::new(settings),
        SizingPolicy::new(&config.view),
        events_tx,
    );

    ui::run(app, events_rx, &config.discovery).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_tracing(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("zeroconf_browser=info"))
        )
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();

    Ok(())
}
