// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `lvpd`: the MRI Server binary. Parses `--config`, loads [`Config`],
//! starts structured logging, brings up the reconciler and Unix socket via
//! [`startup`], then waits for a shutdown signal.

use std::path::PathBuf;

use lvp_daemon::config::{self, Config};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn parse_config_flag() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if let Some(value) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(value));
        }
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = parse_config_flag().or_else(config::config_path_from_env);
    let config = Config::load(config_path.as_deref())?;

    let log_dir = config.root_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log_dir, "lvpd.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config::log_filter()))
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), address = %config.address.display(), "starting MRI server");

    let daemon = lvp_daemon::startup(&config).await?;

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received, stopping reconciler");

    daemon.shutdown();
    daemon.join().await;

    Ok(())
}

async fn wait_for_shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    Ok(())
}
