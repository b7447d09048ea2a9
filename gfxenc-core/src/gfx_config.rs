//! GFX codec parameter store.
//!
//! Loads `gfx.toml`, which selects the codec order, the H.264 encoder, and
//! per-connection-type tuning for both H.264 encoders:
//!
//! ```toml
//! [codec]
//! order = ["H.264", "RFX"]
//! h264_encoder = "OpenH264"
//!
//! [OpenH264.default]
//! EnableFrameSkip = false
//! TargetBitrate = 20_000_000
//! MaxBitrate = 0
//! MaxFrameRate = 60.0
//!
//! [OpenH264.wan]
//! TargetBitrate = 5_000_000
//! ```
//!
//! Loading never fails outright. Every problem degrades the result to
//! something usable and is reported through [`LoadStatus`] and the
//! [`ConfigIssue`] list.
//!
//! Cascading happens at load time: the `default` section is resolved first,
//! copied into every other slot, then each connection-type section overrides
//! the fields it names.

use std::path::Path;

use serde::Serialize;
use toml::{Table, Value};
use tracing::{debug, error, info, warn};

use crate::connection::{ConnectionType, ParamTable};

const X264_TABLE: &str = "x264";
const OPENH264_TABLE: &str = "OpenH264";

pub const X264_DEFAULT_PRESET: &str = "ultrafast";
pub const X264_DEFAULT_TUNE: &str = "zerolatency";
pub const X264_DEFAULT_PROFILE: &str = "main";
pub const X264_DEFAULT_FPS_NUM: i64 = 24;
pub const X264_DEFAULT_FPS_DEN: i64 = 1;
/// One thread per session so a single user cannot exhaust the host.
pub const X264_DEFAULT_THREADS: i64 = 1;

// ── Codec order ──────────────────────────────────────────────────

/// A graphics codec the server can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CodecKind {
    H264,
    Rfx,
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::H264 => f.write_str("H264"),
            Self::Rfx => f.write_str("RFX"),
        }
    }
}

/// Preferred codecs, most preferred first, without duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodecOrder(Vec<CodecKind>);

impl CodecOrder {
    /// Order used when the document does not name any known codec.
    pub fn preferred() -> Self {
        Self(vec![CodecKind::H264, CodecKind::Rfx])
    }

    /// Order used when no document could be read at all.
    pub fn minimal() -> Self {
        Self(vec![CodecKind::Rfx])
    }

    pub fn codecs(&self) -> &[CodecKind] {
        &self.0
    }

    pub fn contains(&self, codec: CodecKind) -> bool {
        self.0.contains(&codec)
    }

    /// Remove `codec`, keeping the relative order of the rest.
    pub fn disable(&mut self, codec: CodecKind) {
        self.0.retain(|c| *c != codec);
    }

    fn push_once(&mut self, codec: CodecKind) {
        if !self.contains(codec) {
            self.0.push(codec);
        }
    }
}

impl std::fmt::Display for CodecOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, codec) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{codec}")?;
        }
        Ok(())
    }
}

/// Which H.264 implementation encodes the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum H264EncoderKind {
    #[default]
    X264,
    OpenH264,
}

impl std::fmt::Display for H264EncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::X264 => f.write_str("x264"),
            Self::OpenH264 => f.write_str("OpenH264"),
        }
    }
}

// ── Parameter records ────────────────────────────────────────────

/// x264 tuning for one connection type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct X264Params {
    pub preset: String,
    pub tune: String,
    pub profile: String,
    /// kbit/s, 0 = uncapped.
    pub vbv_max_bitrate: i64,
    /// kbit, 0 = encoder default.
    pub vbv_buffer_size: i64,
    pub fps_num: i64,
    pub fps_den: i64,
    pub threads: i64,
}

impl Default for X264Params {
    fn default() -> Self {
        Self {
            preset: X264_DEFAULT_PRESET.into(),
            tune: X264_DEFAULT_TUNE.into(),
            profile: X264_DEFAULT_PROFILE.into(),
            vbv_max_bitrate: 0,
            vbv_buffer_size: 0,
            fps_num: X264_DEFAULT_FPS_NUM,
            fps_den: X264_DEFAULT_FPS_DEN,
            threads: X264_DEFAULT_THREADS,
        }
    }
}

/// OpenH264 rate control for one connection type.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct OpenH264Params {
    pub enable_frame_skip: bool,
    /// bit/s.
    pub target_bitrate: i64,
    /// bit/s, 0 = unspecified.
    pub max_bitrate: i64,
    pub max_frame_rate: f32,
}

/// The fully resolved GFX configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GfxConfig {
    pub codec_order: CodecOrder,
    pub h264_encoder: H264EncoderKind,
    pub x264: ParamTable<X264Params>,
    pub openh264: ParamTable<OpenH264Params>,
}

impl Default for GfxConfig {
    /// The minimal configuration: RFX only.
    fn default() -> Self {
        Self {
            codec_order: CodecOrder::minimal(),
            h264_encoder: H264EncoderKind::default(),
            x264: ParamTable::default(),
            openh264: ParamTable::default(),
        }
    }
}

// ── Load status ──────────────────────────────────────────────────

/// Overall outcome of a load, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadStatus {
    /// The file could not be opened or read.
    Unreadable,
    /// The file is not valid TOML.
    Malformed,
    /// H.264 was requested but the selected encoder has no usable defaults.
    H264Disabled,
    /// A default codec order or encoder was substituted.
    Degraded,
    Complete,
}

impl LoadStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Complete)
    }
}

/// A single problem found while loading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ConfigIssue {
    Unreadable(String),
    Malformed(String),
    CodecOrderMissing,
    H264EncoderInvalid(Option<String>),
    TableMissing { table: &'static str },
    SectionMissing { table: &'static str, section: &'static str },
    FieldDefaulted { table: &'static str, field: &'static str },
    InvalidValue { table: &'static str, section: &'static str, field: &'static str },
    H264Disabled { encoder: H264EncoderKind },
}

impl ConfigIssue {
    /// Whether this issue downgrades an otherwise complete load.
    fn is_soft_failure(&self) -> bool {
        matches!(self, Self::CodecOrderMissing | Self::H264EncoderInvalid(_))
    }
}

/// Result of [`load_gfx`] / [`load_gfx_str`].
#[derive(Debug, Clone)]
pub struct GfxLoad {
    pub config: GfxConfig,
    pub status: LoadStatus,
    pub issues: Vec<ConfigIssue>,
}

// ── Loading ──────────────────────────────────────────────────────

/// Load the GFX configuration from a file.
pub fn load_gfx(path: &Path) -> GfxLoad {
    match std::fs::read_to_string(path) {
        Ok(text) => {
            info!("loading GFX config file {}", path.display());
            load_gfx_str(&text)
        }
        Err(e) => {
            error!("error loading GFX config file {} ({e})", path.display());
            GfxLoad {
                config: GfxConfig::default(),
                status: LoadStatus::Unreadable,
                issues: vec![ConfigIssue::Unreadable(e.to_string())],
            }
        }
    }
}

/// Load the GFX configuration from TOML text.
pub fn load_gfx_str(text: &str) -> GfxLoad {
    let doc: Table = match text.parse() {
        Ok(doc) => doc,
        Err(e) => {
            error!("error in GFX config - {e}");
            return GfxLoad {
                config: GfxConfig::default(),
                status: LoadStatus::Malformed,
                issues: vec![ConfigIssue::Malformed(e.to_string())],
            };
        }
    };

    let mut loader = Loader::default();
    let config = loader.resolve(&doc);
    let status = if loader.h264_disabled {
        LoadStatus::H264Disabled
    } else if loader.issues.iter().any(ConfigIssue::is_soft_failure) {
        LoadStatus::Degraded
    } else {
        LoadStatus::Complete
    };

    GfxLoad {
        config,
        status,
        issues: loader.issues,
    }
}

#[derive(Default)]
struct Loader {
    issues: Vec<ConfigIssue>,
    h264_disabled: bool,
}

impl Loader {
    fn resolve(&mut self, doc: &Table) -> GfxConfig {
        let mut config = GfxConfig {
            codec_order: self.codec_order(doc),
            h264_encoder: self.h264_encoder(doc),
            ..GfxConfig::default()
        };

        // Tuning only matters when H.264 can be negotiated at all.
        if !config.codec_order.contains(CodecKind::H264) {
            return config;
        }

        let x264_ok = self.cascade(doc, X264_TABLE, &mut config.x264, read_x264);
        let openh264_ok = self.cascade(doc, OPENH264_TABLE, &mut config.openh264, read_openh264);

        let selected_ok = match config.h264_encoder {
            H264EncoderKind::X264 => x264_ok,
            H264EncoderKind::OpenH264 => openh264_ok,
        };
        if !selected_ok {
            warn!(
                "{} is selected as H.264 encoder but its default config cannot be loaded, disabling H.264",
                config.h264_encoder
            );
            config.codec_order.disable(CodecKind::H264);
            self.h264_disabled = true;
            self.issues.push(ConfigIssue::H264Disabled {
                encoder: config.h264_encoder,
            });
        }

        config
    }

    fn codec_order(&mut self, doc: &Table) -> CodecOrder {
        let mut order = CodecOrder(Vec::with_capacity(2));
        let names = doc
            .get("codec")
            .and_then(Value::as_table)
            .and_then(|codec| codec.get("order"))
            .and_then(Value::as_array);

        for name in names.into_iter().flatten().filter_map(Value::as_str) {
            if name.eq_ignore_ascii_case("h264") || name.eq_ignore_ascii_case("h.264") {
                order.push_once(CodecKind::H264);
            } else if name.eq_ignore_ascii_case("rfx") {
                order.push_once(CodecKind::Rfx);
            } else {
                debug!("[codec] ignoring unknown codec {name:?}");
            }
        }

        if order.0.is_empty() {
            let order = CodecOrder::preferred();
            warn!("[codec] could not get GFX codec order, using default order {order}");
            self.issues.push(ConfigIssue::CodecOrderMissing);
            return order;
        }

        debug!("[codec] order {order}");
        order
    }

    fn h264_encoder(&mut self, doc: &Table) -> H264EncoderKind {
        let name = doc
            .get("codec")
            .and_then(Value::as_table)
            .and_then(|codec| codec.get("h264_encoder"))
            .and_then(Value::as_str);

        match name {
            Some(n) if n.eq_ignore_ascii_case("x264") => H264EncoderKind::X264,
            Some(n) if n.eq_ignore_ascii_case("openh264") => H264EncoderKind::OpenH264,
            other => {
                warn!("[codec] could not get valid H.264 encoder, using default \"x264\"");
                self.issues
                    .push(ConfigIssue::H264EncoderInvalid(other.map(str::to_owned)));
                H264EncoderKind::X264
            }
        }
    }

    /// Resolve the default slot, then cascade it into the other slots.
    /// Returns `false` when the default slot could not be loaded.
    fn cascade<T: Clone>(
        &mut self,
        doc: &Table,
        table_name: &'static str,
        table: &mut ParamTable<T>,
        read: fn(&mut Loader, &Table, &'static str, ConnectionType, &mut T),
    ) -> bool {
        let Some(table_doc) = doc.get(table_name).and_then(Value::as_table) else {
            warn!("[{table_name}] params are not defined");
            self.issues.push(ConfigIssue::TableMissing { table: table_name });
            return false;
        };

        let default_section = ConnectionType::Default.section_name();
        let Some(section) = table_doc.get(default_section).and_then(Value::as_table) else {
            warn!("[{table_name}] params for connection type [{default_section}] are not defined");
            self.issues.push(ConfigIssue::SectionMissing {
                table: table_name,
                section: default_section,
            });
            return false;
        };
        read(self, section, table_name, ConnectionType::Default, table.slot_mut(0));

        let base = table.base().clone();
        for ct in &ConnectionType::TABLE_ORDER[1..] {
            let slot = table.slot_mut(*ct as usize);
            *slot = base.clone();
            match table_doc.get(ct.section_name()).and_then(Value::as_table) {
                Some(section) => read(self, section, table_name, *ct, slot),
                None => debug!("[{table_name}.{ct}] not defined, inheriting default"),
            }
        }
        true
    }

    /// Log and record a field falling back to its constant.
    /// Only the default section reports; other sections inherit silently.
    fn defaulted(
        &mut self,
        table: &'static str,
        ct: ConnectionType,
        field: &'static str,
        value: &dyn std::fmt::Debug,
    ) {
        if ct == ConnectionType::Default {
            warn!("[{table}.{ct}] {field} is not set, adopting the default value [{value:?}]");
            self.issues.push(ConfigIssue::FieldDefaulted { table, field });
        }
    }
}

fn read_x264(
    loader: &mut Loader,
    section: &Table,
    table: &'static str,
    ct: ConnectionType,
    out: &mut X264Params,
) {
    let is_base = ct == ConnectionType::Default;

    for (field, slot, fallback) in [
        ("preset", &mut out.preset, X264_DEFAULT_PRESET),
        ("tune", &mut out.tune, X264_DEFAULT_TUNE),
        ("profile", &mut out.profile, X264_DEFAULT_PROFILE),
    ] {
        match section.get(field).and_then(Value::as_str) {
            Some(v) => *slot = v.to_owned(),
            None if is_base => {
                loader.defaulted(table, ct, field, &fallback);
                *slot = fallback.to_owned();
            }
            None => {}
        }
    }

    for (field, slot, fallback) in [
        ("vbv_max_bitrate", &mut out.vbv_max_bitrate, 0),
        ("vbv_buffer_size", &mut out.vbv_buffer_size, 0),
        ("fps_num", &mut out.fps_num, X264_DEFAULT_FPS_NUM),
        ("fps_den", &mut out.fps_den, X264_DEFAULT_FPS_DEN),
    ] {
        match section.get(field).and_then(Value::as_integer) {
            Some(v) => *slot = v,
            None if is_base => {
                loader.defaulted(table, ct, field, &fallback);
                *slot = fallback;
            }
            None => {}
        }
    }

    match section.get("threads").and_then(Value::as_integer) {
        Some(v) if v >= 0 => out.threads = v,
        Some(v) => {
            warn!(
                "[{table}.{ct}] an invalid value ({v}) is specified for threads, adopting the default value [{X264_DEFAULT_THREADS}]"
            );
            loader.issues.push(ConfigIssue::InvalidValue {
                table,
                section: ct.section_name(),
                field: "threads",
            });
            out.threads = X264_DEFAULT_THREADS;
        }
        None if is_base => {
            loader.defaulted(table, ct, "threads", &X264_DEFAULT_THREADS);
            out.threads = X264_DEFAULT_THREADS;
        }
        None => {}
    }
}

fn read_openh264(
    loader: &mut Loader,
    section: &Table,
    table: &'static str,
    ct: ConnectionType,
    out: &mut OpenH264Params,
) {
    let is_base = ct == ConnectionType::Default;

    match section.get("EnableFrameSkip").and_then(Value::as_bool) {
        Some(v) => out.enable_frame_skip = v,
        None if is_base => {
            loader.defaulted(table, ct, "EnableFrameSkip", &false);
            out.enable_frame_skip = false;
        }
        None => {}
    }

    for (field, slot) in [
        ("TargetBitrate", &mut out.target_bitrate),
        ("MaxBitrate", &mut out.max_bitrate),
    ] {
        match section.get(field).and_then(Value::as_integer) {
            Some(v) => *slot = v,
            None if is_base => {
                loader.defaulted(table, ct, field, &0);
                *slot = 0;
            }
            None => {}
        }
    }

    // Accept `60` as well as `60.0`.
    let rate = section.get("MaxFrameRate").and_then(|v| match v {
        Value::Float(f) => Some(*f as f32),
        Value::Integer(i) => Some(*i as f32),
        _ => None,
    });
    match rate {
        Some(v) => out.max_frame_rate = v,
        None if is_base => {
            loader.defaulted(table, ct, "MaxFrameRate", &0.0);
            out.max_frame_rate = 0.0;
        }
        None => {}
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        [codec]
        order = ["H.264", "RFX"]
        h264_encoder = "OpenH264"

        [x264.default]
        preset = "ultrafast"
        tune = "zerolatency"
        profile = "main"
        vbv_max_bitrate = 0
        vbv_buffer_size = 0
        fps_num = 60
        fps_den = 1
        threads = 1

        [x264.wan]
        vbv_max_bitrate = 15000
        vbv_buffer_size = 1500

        [OpenH264.default]
        EnableFrameSkip = false
        TargetBitrate = 20000000
        MaxBitrate = 0
        MaxFrameRate = 60.0

        [OpenH264.modem]
        EnableFrameSkip = true
        TargetBitrate = 1200000
    "#;

    #[test]
    fn full_document_is_complete() {
        let load = load_gfx_str(FULL);
        assert_eq!(load.status, LoadStatus::Complete);
        assert!(load.issues.is_empty(), "{:?}", load.issues);
        assert_eq!(load.config.codec_order.codecs(), [CodecKind::H264, CodecKind::Rfx]);
        assert_eq!(load.config.h264_encoder, H264EncoderKind::OpenH264);
    }

    #[test]
    fn connection_sections_override_only_named_fields() {
        let cfg = load_gfx_str(FULL).config;

        let modem = cfg.openh264.for_encode(ConnectionType::Modem);
        assert!(modem.enable_frame_skip);
        assert_eq!(modem.target_bitrate, 1_200_000);
        assert_eq!(modem.max_frame_rate, 60.0);

        let wan = cfg.x264.for_encode(ConnectionType::Wan);
        assert_eq!(wan.vbv_max_bitrate, 15000);
        assert_eq!(wan.fps_num, 60);
        assert_eq!(wan.preset, "ultrafast");
    }

    #[test]
    fn unknown_codec_names_are_ignored() {
        let load = load_gfx_str(
            r#"
            [codec]
            order = ["vp9", "rfx"]
            h264_encoder = "x264"
            "#,
        );
        assert_eq!(load.config.codec_order.codecs(), [CodecKind::Rfx]);
        assert_eq!(load.status, LoadStatus::Complete);
    }

    #[test]
    fn negative_threads_fall_back() {
        let load = load_gfx_str(
            r#"
            [codec]
            order = ["h264"]
            h264_encoder = "x264"
            [x264.default]
            threads = 4
            [x264.lan]
            threads = -2
            "#,
        );
        assert_eq!(load.config.x264.base().threads, 4);
        assert_eq!(load.config.x264.for_encode(ConnectionType::Lan).threads, 1);
        assert!(load.issues.iter().any(|i| matches!(
            i,
            ConfigIssue::InvalidValue { field: "threads", .. }
        )));
    }

    #[test]
    fn missing_default_fields_take_constants() {
        let load = load_gfx_str(
            r#"
            [codec]
            order = ["h264"]
            h264_encoder = "x264"
            [x264.default]
            preset = "veryfast"
            "#,
        );
        let base = load.config.x264.base();
        assert_eq!(base.preset, "veryfast");
        assert_eq!(base.tune, X264_DEFAULT_TUNE);
        assert_eq!(base.fps_num, X264_DEFAULT_FPS_NUM);
        assert_eq!(load.status, LoadStatus::Complete);
        assert!(load
            .issues
            .contains(&ConfigIssue::FieldDefaulted { table: "x264", field: "tune" }));
    }

    #[test]
    fn wrongly_typed_fields_count_as_absent() {
        let load = load_gfx_str(
            r#"
            [codec]
            order = ["h264"]
            h264_encoder = "openh264"
            [OpenH264.default]
            TargetBitrate = "lots"
            MaxFrameRate = 30
            "#,
        );
        let base = load.config.openh264.base();
        assert_eq!(base.target_bitrate, 0);
        assert_eq!(base.max_frame_rate, 30.0);
    }

    #[test]
    fn codec_order_display() {
        assert_eq!(CodecOrder::preferred().to_string(), "H264, RFX");
        assert_eq!(CodecOrder::minimal().to_string(), "RFX");
    }

    #[test]
    fn malformed_document_yields_minimal_config() {
        let load = load_gfx_str("[codec\norder = ");
        assert_eq!(load.status, LoadStatus::Malformed);
        assert_eq!(load.config, GfxConfig::default());
    }
}
