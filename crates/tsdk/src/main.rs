mod color;
mod config;
mod metrics;
mod render;
mod stream;
mod transform;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use truckscenes::TruckScenes;

use crate::config::Config;
use crate::metrics::DevkitMetrics;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();
    let config = Config::parse();
    tracing::info!(config = ?config, "devkit starting");

    if !config.dataroot.is_dir() {
        eprintln!("Error: data directory not found: {}", config.dataroot.display());
        eprintln!();
        eprintln!("Specify the correct path using one of:");
        eprintln!("  1. --dataroot /path/to/man-truckscenes");
        eprintln!("  2. export TRUCKSCENES_DATAROOT=/path/to/man-truckscenes");
        std::process::exit(1);
    }

    tracing::info!(
        version = %config.dataset_version,
        dataroot = %config.dataroot.display(),
        "loading dataset"
    );
    let ts = TruckScenes::load(&config.dataroot, &config.dataset_version)?;

    let metrics = Arc::new(DevkitMetrics::new());
    if let Some(addr) = &config.metrics_listen_addr {
        let router = metrics.router();
        let metrics_addr: std::net::SocketAddr = addr.parse()?;
        tokio::spawn(async move {
            let listener = tokio::net::TcpListener::bind(metrics_addr).await.unwrap();
            tracing::info!(addr = %metrics_addr, "metrics server started");
            axum::serve(listener, router.into_make_service())
                .await
                .unwrap();
        });
    }

    if config.foxglove {
        stream::run(ts, &config, metrics).await
    } else {
        render::run(&ts, &config, metrics)
    }
}
