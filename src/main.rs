use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

mod config;
mod media;
mod server;
mod wifi;

use config::Config;
use media::{Platform, ProvisionOutcome, Provisioner};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Download the standalone yt-dlp binary for this platform
    Provision,
}

fn get_config_path(args: &Args) -> Option<String> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }

    if let Ok(path) = std::env::var("CONFIG_FILE") {
        return Some(path);
    }

    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        let config_path = format!("{}/qrtube/config.toml", xdg_config_home);
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_path = format!("{}/.config/qrtube/config.toml", home.display());
        if std::path::Path::new(&config_path).exists() {
            return Some(config_path);
        }
    }

    None
}

fn load_config(args: &Args) -> Result<Config> {
    match get_config_path(args) {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path)),
        None => {
            let mut config = Config::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }
}

async fn provision(config: &Config) -> Result<()> {
    let provisioner = Provisioner::from_config(&config.provision, &config.ytdlp.binary_dir)?;

    let outcome = match provisioner.ensure_binary(Platform::current()).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!("Failed to download binary: {}", e);
            return Err(e).context("Provisioning yt-dlp failed");
        }
    };

    match outcome {
        ProvisionOutcome::Installed(path) => info!("yt-dlp ready at {}", path.display()),
        ProvisionOutcome::Skipped => info!("Nothing to provision on this platform"),
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    if config.get_logging_format() == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("Starting qrtube...");
            server::run(config).await
        }
        Command::Provision => provision(&config).await,
    }
}
