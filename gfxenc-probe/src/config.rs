//! Configuration for the encoder probe.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use gfxenc_core::{ConnectionType, PipelineConfig, PixelFormat};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Codec parameter store location.
    pub gfx: GfxSection,
    /// Encode pipeline tuning.
    pub pipeline: PipelineConfig,
    /// Synthetic frames pushed through the pipeline.
    pub workload: WorkloadConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GfxSection {
    /// Path of `gfx.toml`.
    pub config_path: PathBuf,
}

/// Synthetic workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Frames to encode.
    pub frames: u32,
    /// Region width in pixels.
    pub width: u32,
    /// Region height in pixels.
    pub height: u32,
    /// Source pixel format: "nv12", "bgra" or "rgba".
    pub format: String,
    /// Number of channels the frames rotate over.
    pub channels: u32,
    /// Behave like a client that disabled frame acknowledgements.
    pub ack_off: bool,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for GfxSection {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from("gfx.toml"),
        }
    }
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            frames: 30,
            width: 256,
            height: 256,
            format: "bgra".into(),
            channels: 1,
            ack_off: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ProbeConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// The default configuration as TOML text.
    pub fn default_toml() -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(&Self::default())
    }

    /// Connection class the pipeline tunes for.
    pub fn connection_type(&self) -> ConnectionType {
        self.pipeline.connection_type
    }
}

impl WorkloadConfig {
    /// The configured source format. Unknown names fall back to BGRA.
    pub fn pixel_format(&self) -> PixelFormat {
        match self.format.to_ascii_lowercase().as_str() {
            "nv12" => PixelFormat::Nv12,
            "rgba" | "rgba32" => PixelFormat::Rgba32,
            "bgra" | "bgra32" | "xrgb" => PixelFormat::Bgra32,
            other => {
                tracing::warn!("unknown workload format {other:?}; using bgra");
                PixelFormat::Bgra32
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
