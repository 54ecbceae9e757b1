use clap::Parser;
use std::path::PathBuf;

/// `tsdk` - TruckScenes devkit: visualization and Foxglove streaming.
///
/// Without flags the first scene is rendered to bird's-eye-view images.
/// With `--foxglove` the dataset is streamed over a WebSocket server that
/// Foxglove Studio can connect to.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
pub struct Config {
    /// Stream to Foxglove Studio via WebSocket instead of rendering.
    #[arg(long)]
    pub foxglove: bool,

    /// Foxglove WebSocket listen port.
    #[arg(long, default_value_t = 8765)]
    pub port: u16,

    /// Scene index to render, or to restrict streaming to.
    #[arg(long)]
    pub scene: Option<usize>,

    /// Sample token to render (visualization mode only).
    #[arg(long)]
    pub sample: Option<String>,

    /// Path to the dataset root (the directory holding the version
    /// subdirectory and the sensor files).
    #[arg(long, env = "TRUCKSCENES_DATAROOT", default_value = "../data/man-truckscenes")]
    pub dataroot: PathBuf,

    /// Dataset version, i.e. the metadata subdirectory name.
    #[arg(long = "version", env = "TRUCKSCENES_VERSION", default_value = "v1.1-mini")]
    pub dataset_version: String,

    /// Output directory for rendered images.
    #[arg(long, default_value = "renders")]
    pub out: PathBuf,

    /// Optional listen address for the Prometheus metrics server.
    #[arg(long, env = "TSDK_METRICS_LISTEN_ADDR")]
    pub metrics_listen_addr: Option<String>,
}
