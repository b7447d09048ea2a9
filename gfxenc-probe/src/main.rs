//! gfxenc-probe entry point.
//!
//! ```text
//! gfxenc-probe                        Self-test, then run the workload
//! gfxenc-probe --self-test            Report engine availability only
//! gfxenc-probe --config <path>        Load a custom probe TOML
//! gfxenc-probe --gfx-config <path>    Override the gfx.toml location
//! gfxenc-probe --gen-config           Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gfxenc_core::{LoadStatus, load_gfx, select_h264_backend};
use gfxenc_probe::config::ProbeConfig;
use gfxenc_probe::probe::{self, ProbeRunner, SelfTestReport, WorkloadReport};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "gfxenc-probe", about = "H.264 encoder pipeline probe")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "gfxenc-probe.toml")]
    config: PathBuf,

    /// Path to gfx.toml, overriding the configured one.
    #[arg(long)]
    gfx_config: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Only report engine availability.
    #[arg(long)]
    self_test: bool,

    /// Override the number of workload frames.
    #[arg(long)]
    frames: Option<u32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,
}

#[derive(Serialize)]
struct Report {
    self_test: SelfTestReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    workload: Option<WorkloadReport>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", ProbeConfig::default_toml()?);
        return Ok(());
    }

    let mut config = ProbeConfig::load(&cli.config);
    if let Some(path) = cli.gfx_config {
        config.gfx.config_path = path;
    }
    if let Some(frames) = cli.frames {
        config.workload.frames = frames;
    }
    if let Some(width) = cli.width {
        config.workload.width = width;
    }
    if let Some(height) = cli.height {
        config.workload.height = height;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("gfxenc-probe v{}", env!("CARGO_PKG_VERSION"));
    info!("gfx config: {}", config.gfx.config_path.display());
    info!(
        "workload: {} frames of {}x{} {}",
        config.workload.frames, config.workload.width, config.workload.height,
        config.workload.format
    );

    let loaded = load_gfx(&config.gfx.config_path);
    if loaded.status != LoadStatus::Complete {
        warn!("gfx config loaded with status {:?}", loaded.status);
    }
    for issue in &loaded.issues {
        info!("gfx config: {issue:?}");
    }
    info!(
        "codec order: {}; h264 encoder: {}",
        loaded.config.codec_order, loaded.config.h264_encoder
    );

    let self_test = probe::self_test(&loaded);
    let mut report = Report {
        self_test,
        workload: None,
    };

    if !cli.self_test {
        match select_h264_backend(&loaded.config) {
            Some(backend) => {
                let runner = ProbeRunner::new(config);
                let stop = runner.stop_handle();

                // Ctrl-C handler.
                tokio::spawn(async move {
                    tokio::signal::ctrl_c().await.ok();
                    info!("Ctrl-C received, stopping workload");
                    stop.store(false, std::sync::atomic::Ordering::SeqCst);
                });

                report.workload = Some(runner.run(backend).await?);
            }
            None => warn!("no usable H.264 backend; skipping workload"),
        }
    }

    println!("{}", toml::to_string_pretty(&report)?);
    Ok(())
}
