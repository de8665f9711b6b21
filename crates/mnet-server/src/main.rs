//! mnet-server: login server on the mnet transport.

use anyhow::Context;
use clap::Parser;
use mnet_core::XorStreamCipher;
use mnet_server::config::{CliOverrides, ServerConfig};
use mnet_server::login;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// mnet-server: game login server
#[derive(Parser, Debug)]
#[command(name = "mnet-server", version, about = "Game login server")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Bind address
    #[arg(long)]
    bind: Option<String>,

    /// Config file path
    #[arg(long, default_value = "~/.mnet/config.toml")]
    config: String,

    /// Protocol version announced in the handshake
    #[arg(long)]
    protocol_version: Option<u32>,

    /// Patch type sent to clients (delete, patch, ignore)
    #[arg(long)]
    patch_type: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    if let Err(e) = run(cli).await {
        error!(error = %format_args!("{e:#}"), "server error");
        std::process::exit(1);
    }
    info!("mnet-server stopped");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = CliOverrides {
        bind: cli.bind,
        port: cli.port,
        version: cli.protocol_version,
        patch_type: cli.patch_type,
    };
    let config_path = PathBuf::from(&cli.config);
    let config = ServerConfig::load(Some(&config_path), &overrides).context("failed to load config")?;

    info!(
        bind = %config.listener.bind,
        port = config.listener.port,
        version = config.listener.transport.version,
        patch_type = %config.listener.patch_type,
        "starting mnet-server"
    );

    let cipher = Arc::new(XorStreamCipher::with_max_frame_size(config.max_frame_size));
    let server = login::server(config.listener, cipher).context("failed to build login server")?;
    let listener = server
        .bind()
        .await
        .with_context(|| format!("failed to bind {}", server.bind_addr()))?;

    let serving = tokio::spawn(server.clone().serve(listener));
    shutdown_signal().await;
    info!("received shutdown signal");
    server.stop();

    serving.await.context("listener task failed")??;
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
