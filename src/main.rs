//! Solo SSH Gateway
//!
//! A restricted SSH server for a single user: public-key auth against an
//! authorized_keys file, a shell or one command per session, no forwarding.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use solo_gateway::config::GatewayConfig;
use solo_gateway::ssh;

/// Solo SSH Gateway - one user, one shell, no tunnels
#[derive(Parser, Debug)]
#[command(name = "solo-gateway", version, about)]
struct Cli {
    /// Path to an optional TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(long)]
    addr: Option<String>,

    /// Path to private host key
    #[arg(long)]
    hostkey: Option<PathBuf>,

    /// Path to authorized_keys file
    #[arg(long)]
    authkeys: Option<PathBuf>,

    /// Shell to use
    #[arg(long)]
    shell: Option<PathBuf>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    generate_config: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_config(self) -> Result<GatewayConfig> {
        let mut config = match &self.config {
            Some(path) => GatewayConfig::load_or_default(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => GatewayConfig::default(),
        };

        if let Some(addr) = self.addr {
            config.listen_addr = addr;
        }
        if let Some(hostkey) = self.hostkey {
            config.host_key_path = hostkey;
        }
        if let Some(authkeys) = self.authkeys {
            config.authorized_keys_path = authkeys;
        }
        if let Some(shell) = self.shell {
            config.shell = shell;
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new(Level::DEBUG.to_string())
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let generate_config = cli.generate_config;
    let config = cli.into_config()?;

    if generate_config {
        let content = toml::to_string_pretty(&config)?;
        println!("{}", content);
        return Ok(());
    }

    info!("Starting restricted SSH server on {}", config.listen_addr);
    info!("  Shell: {}", config.shell.display());
    info!("  Authorized keys: {}", config.authorized_keys_path.display());

    ssh::run_server(Arc::new(config)).await
}
