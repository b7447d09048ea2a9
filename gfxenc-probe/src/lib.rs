//! # gfxenc-probe: encoder probe
//!
//! Loads a `gfx.toml`, reports which H.264 engines this build can drive,
//! and optionally pushes a synthetic workload through the encode pipeline
//! to exercise context creation, flow control and result delivery.

pub mod config;
pub mod probe;
