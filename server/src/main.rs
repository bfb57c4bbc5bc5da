use clap::Parser;
use log::info;
use server::config::ServerConfig;
use server::network::run_supervised;
use server::store::{MemoryUserStore, UserStore};
use shared::opcodes::PROTOCOL_VERSION;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Server IP address to bind to
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// Server port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Seconds of silence before a session is dropped
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Maximum queued updates per session
    #[arg(long)]
    max_pending_updates: Option<usize>,

    /// File where registered users are kept
    #[arg(short, long)]
    users_file: Option<PathBuf>,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };

        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        if let Some(max) = self.max_pending_updates {
            config.max_pending_updates = max;
        }
        if self.users_file.is_some() {
            config.users_file = self.users_file;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Args::parse().into_config()?;
    info!("Arena server (protocol v{}) is starting...", PROTOCOL_VERSION);

    let store: Arc<dyn UserStore> = match &config.users_file {
        Some(path) => Arc::new(MemoryUserStore::load(path)?),
        None => Arc::new(MemoryUserStore::new()),
    };

    tokio::select! {
        _ = run_supervised(config, store) => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
