use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod admin;
mod config;
mod format;
mod host;
mod logs;
mod netinfo;
mod pages;
mod session;
mod upgrade;

use admin::{dashboard_router, AppState};
use config::Config;

#[derive(Parser, Debug)]
#[command(name = "sysdash", version, about = "Administrative web dashboard for a single host")]
struct Args {
    /// Configuration file, created with defaults if missing
    #[arg(short, long, default_value = "sysdash.toml")]
    config: PathBuf,

    /// Override the listen address
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sysdash=info,tower_http=info")),
        )
        .init();

    let args = Args::parse();
    let mut config = Config::load_or_create(&args.config).await?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    if config.auth.password == "admin" {
        tracing::warn!("Dashboard is using the default password, change it in {}", args.config.display());
    }

    let app = dashboard_router(AppState::new(config));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("sysdash listening on http://{}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
