use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use infer_server::{run_server, AppState, MonotonicClock, ServerConfig};
use tracing_subscriber::EnvFilter;

/// Session-aware text generation gateway.
#[derive(Debug, Parser)]
#[command(name = "infer-server", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:5000.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Maximum number of simultaneously open sessions.
    #[arg(long)]
    max_sessions: Option<usize>,

    /// Idle seconds before a session expires.
    #[arg(long)]
    step_timeout_secs: Option<u64>,

    /// Model used when a request does not name one.
    #[arg(long)]
    default_model: Option<String>,
}

impl Cli {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(max) = self.max_sessions {
            config.max_sessions = max;
        }
        if let Some(secs) = self.step_timeout_secs {
            config.step_timeout_secs = secs;
        }
        if let Some(model) = self.default_model {
            config.default_model = model;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref()).context("loading configuration")?;
    cli.apply(&mut config);
    config.validate().context("validating configuration")?;

    tracing::info!(
        default_model = %config.default_model,
        max_sessions = config.max_sessions,
        step_timeout_secs = config.step_timeout_secs,
        "starting infer-server"
    );

    let state = AppState::from_config(config, Arc::new(MonotonicClock));
    run_server(state).await.context("server error")?;
    Ok(())
}
