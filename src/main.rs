use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use log::info;
use tokio::net::TcpListener;

use execd::api::{create_router, AppState};
use execd::config::{parse_duration, Settings};
use execd::runtime::Controller;

#[derive(Debug, Parser)]
#[command(
    name = "execd",
    version,
    about = "Sandbox execution daemon: runs code and shell commands, streaming output over SSE."
)]
struct Cli {
    /// HTTP listen port
    #[arg(long, env = "EXECD_PORT", default_value_t = 44772)]
    port: u16,

    /// Jupyter server address (e.g. http://localhost:8888)
    #[arg(long = "jupyter-host", env = "JUPYTER_HOST", default_value = "")]
    jupyter_host: String,

    /// Jupyter server authentication token
    #[arg(long = "jupyter-token", env = "JUPYTER_TOKEN", default_value = "")]
    jupyter_token: String,

    /// Shared API access token; empty disables the check
    #[arg(long = "access-token", env = "EXECD_ACCESS_TOKEN", default_value = "")]
    access_token: String,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long = "log-level", env = "EXECD_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// How long SSE streams stay open after an execution finishes
    #[arg(
        long = "grace-shutdown",
        env = "EXECD_API_GRACE_SHUTDOWN",
        default_value = "1s"
    )]
    grace_shutdown: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(cli.log_level.clone()),
    )
    .init();

    let grace_shutdown = parse_duration(&cli.grace_shutdown)
        .map_err(|err| anyhow::anyhow!("failed to parse graceful shutdown timeout: {err}"))?;

    let settings = Settings {
        port: cli.port,
        jupyter_host: cli.jupyter_host,
        jupyter_token: cli.jupyter_token,
        access_token: cli.access_token,
        log_level: cli.log_level,
        grace_shutdown,
    };
    if let Err(err) = settings.validate() {
        bail!(err);
    }

    serve(settings)
}

#[tokio::main]
async fn serve(settings: Settings) -> Result<()> {
    info!("Jupyter server host is: {}", settings.jupyter_host);

    let controller = Arc::new(Controller::new(
        settings.jupyter_host.clone(),
        settings.jupyter_token.clone(),
    ));
    let state = AppState::new(controller, settings.access_token.clone(), settings.grace_shutdown);
    let router = create_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("execd listening on {addr}");

    axum::serve(listener, router)
        .await
        .context("failed to start execd server")?;
    Ok(())
}
