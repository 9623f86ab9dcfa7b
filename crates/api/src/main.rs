//! Scriptorium API server binary.
//!
//! Usage:
//!   scriptorium --config scriptorium.toml
//!   scriptorium --port 8000 --host 0.0.0.0
//!
//! # Environment Variables
//!
//! - `SCRIPTORIUM_HOST` / `SCRIPTORIUM_PORT` - Bind address (overridden by flags)
//! - `OPENAI_API_KEY`, `ANTHROPIC_API_KEY`, `GOOGLE_GEMINI_API_KEY`, `GROK_API_KEY` - Provider keys
//! - `SERPER_API_KEY` - Retrieval tools
//!
//! Variables may also be placed in a `.env` file in the working directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use scriptorium_api::{AppConfig, AppState, serve};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Scriptorium: configurable agent pipelines for research proposals
#[derive(Parser)]
#[command(name = "scriptorium", version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to bind to
    #[arg(long, env = "SCRIPTORIUM_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SCRIPTORIUM_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scriptorium_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let mut config = if let Some(path) = cli.config {
        tracing::info!(path = %path.display(), "Loading configuration");
        AppConfig::from_file(&path)?
    } else {
        tracing::info!("Using default configuration");
        AppConfig::default()
    };

    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    if config.server.host == "0.0.0.0" {
        tracing::warn!(
            "Server binding to 0.0.0.0. This exposes the API to all network interfaces \
             and it has no authentication."
        );
    }

    let missing = config.llm.providers_missing_keys();
    if !missing.is_empty() {
        tracing::warn!(
            providers = ?missing,
            "No API key set for some providers; agents using them will fail when run"
        );
    }
    if config.tools.enabled && std::env::var(&config.tools.api_key_env).is_err() {
        tracing::warn!(
            env = %config.tools.api_key_env,
            "Search API key not set; agents will run without retrieved context"
        );
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let state = AppState::new(config);
    serve(Arc::new(state), addr).await?;

    Ok(())
}
