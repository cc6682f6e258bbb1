use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use clawmini_kernel::{KernelBuilder, SettingsArgs};
use tracing::{info, warn};

mod api;

use crate::api::{AppState, router};

#[derive(Debug, Parser)]
#[command(name = "clawmini-api")]
#[command(about = "clawmini HTTP/SSE API")]
struct Cli {
    #[arg(long, env = "CLAWMINI_LISTEN", default_value = "127.0.0.1:8002")]
    listen: SocketAddr,
    #[command(flatten)]
    settings: SettingsArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let dotenv = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();
    match dotenv {
        Ok(path) => info!(path = %path.display(), "loaded environment file"),
        Err(error) if error.not_found() => {}
        Err(error) => warn!(%error, "failed to load .env, using process environment"),
    }

    let cli = Cli::parse();
    let settings = cli.settings.into_settings();
    let root = settings.root.clone();
    let kernel = KernelBuilder::new(settings).build()?;
    kernel.ensure_layout().await?;

    let app = router(AppState { kernel });
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!(listen = %cli.listen, root = %root.display(), "clawmini-api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            tracing::error!(%error, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    {
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    tracing::error!(%error, "failed to install SIGTERM handler");
                }
            }
        };

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await;
    }
}
