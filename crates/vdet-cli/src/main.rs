//! `vdet` command-line object detector.
//!
//! Results are written to stdout as JSON lines; logs go to stderr.

mod commands;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{parse_size, DetectorArgs, DetectorConfig};

#[derive(Parser, Debug)]
#[command(name = "vdet", version, about = "Object detection for images and video")]
struct Cli {
    #[command(flatten)]
    detector: DetectorArgs,

    /// Print a Prometheus metrics snapshot to stderr when done
    #[arg(long, global = true)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect objects in one or more image files
    Image {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Detect objects in frames sampled from a video file
    Video {
        path: PathBuf,

        /// Frames sampled per second (default: 1)
        #[arg(long)]
        fps: Option<f64>,

        /// Downscale decoded frames to fit, e.g. 1280 or 1280x720
        #[arg(long, value_parser = parse_size)]
        max_resolution: Option<vdet_models::ImageSize>,

        /// Skip frames that fail to decode instead of stopping
        #[arg(long)]
        skip_bad_frames: bool,
    },
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Colored output for dev, JSON with `LOG_FORMAT=json`. Always on stderr.
fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    for directive in ["vdet=info", "ort=warn", "onnxruntime=warn"] {
        if let Ok(directive) = directive.parse() {
            env_filter = env_filter.add_directive(directive);
        }
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let metrics = if cli.metrics {
        Some(PrometheusBuilder::new().install_recorder()?)
    } else {
        None
    };

    let mut config = DetectorConfig::from_env().with_args(&cli.detector);
    info!(
        model = %config.model,
        compute_units = %config.compute_units,
        "Starting vdet"
    );

    let result = match cli.command {
        Command::Image { paths } => commands::detect_images(&config, &paths).await,
        Command::Video {
            path,
            fps,
            max_resolution,
            skip_bad_frames,
        } => {
            if fps.is_some() {
                config.fps = fps;
            }
            if max_resolution.is_some() {
                config.max_resolution = max_resolution;
            }
            config.skip_bad_frames |= skip_bad_frames;
            commands::detect_video(&config, path).await
        }
    };

    if let Some(handle) = metrics {
        eprintln!("{}", handle.render());
    }

    result
}
