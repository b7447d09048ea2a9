//! Connection-quality classes negotiated over the remote-desktop protocol.
//!
//! The numeric values match the `connectionType` field of the client's
//! early capability data (MS-RDPBCGR 2.2.1.3.2). Slot 0 is not a wire value:
//! it is the cascading base of every parameter table.

use serde::{Deserialize, Serialize};

/// Number of slots in a per-connection-type parameter table
/// (`Default` plus `Modem..=Lan`).
pub const NUM_CONNECTION_TYPES: usize = 7;

// ── ConnectionType ───────────────────────────────────────────────

/// A connection-quality class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConnectionType {
    /// Cascading base entry; never sent by a client.
    Default = 0,
    Modem = 1,
    BroadbandLow = 2,
    Satellite = 3,
    BroadbandHigh = 4,
    Wan = 5,
    Lan = 6,
    /// Client asked the server to measure the link. Has no table slot.
    Autodetect = 7,
}

impl ConnectionType {
    /// Every class that owns a table slot, in slot order.
    pub const TABLE_ORDER: [ConnectionType; NUM_CONNECTION_TYPES] = [
        ConnectionType::Default,
        ConnectionType::Modem,
        ConnectionType::BroadbandLow,
        ConnectionType::Satellite,
        ConnectionType::BroadbandHigh,
        ConnectionType::Wan,
        ConnectionType::Lan,
    ];

    /// Decode a wire value. Unknown values yield `None`.
    pub fn from_wire(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Default,
            1 => Self::Modem,
            2 => Self::BroadbandLow,
            3 => Self::Satellite,
            4 => Self::BroadbandHigh,
            5 => Self::Wan,
            6 => Self::Lan,
            7 => Self::Autodetect,
            _ => return None,
        })
    }

    /// Name of the TOML sub-section holding this class's parameters.
    pub const fn section_name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Modem => "modem",
            Self::BroadbandLow => "broadband_low",
            Self::Satellite => "satellite",
            Self::BroadbandHigh => "broadband_high",
            Self::Wan => "wan",
            Self::Lan => "lan",
            Self::Autodetect => "autodetect",
        }
    }

    /// Table slot for this class, if it has one.
    pub const fn slot(self) -> Option<usize> {
        match self {
            Self::Autodetect => None,
            other => Some(other as usize),
        }
    }

    /// The class an encoder actually tunes for.
    ///
    /// Anything outside `Modem..=Lan` (the synthetic default, autodetect,
    /// unknown wire values) is treated as a LAN client.
    pub fn clamp_for_encode(raw: u32) -> Self {
        match Self::from_wire(raw) {
            Some(ct) if (Self::Modem as u32..=Self::Lan as u32).contains(&(ct as u32)) => ct,
            _ => Self::Lan,
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.section_name())
    }
}

// ── ParamTable ───────────────────────────────────────────────────

/// One fully-resolved parameter record per connection-type slot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamTable<T> {
    entries: [T; NUM_CONNECTION_TYPES],
}

impl<T: Clone + Default> Default for ParamTable<T> {
    fn default() -> Self {
        Self {
            entries: std::array::from_fn(|_| T::default()),
        }
    }
}

impl<T> ParamTable<T> {
    /// Record used when encoding for `ct` (after clamping).
    pub fn for_encode(&self, ct: ConnectionType) -> &T {
        let slot = ct.slot().unwrap_or(ConnectionType::Lan as usize);
        &self.entries[slot]
    }

    /// The cascading base record.
    pub fn base(&self) -> &T {
        &self.entries[0]
    }

    /// Record stored in `slot`, or `None` when out of range.
    pub fn get(&self, slot: usize) -> Option<&T> {
        self.entries.get(slot)
    }

    pub(crate) fn slot_mut(&mut self, slot: usize) -> &mut T {
        &mut self.entries[slot]
    }

    /// Iterate `(class, record)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionType, &T)> {
        ConnectionType::TABLE_ORDER.iter().copied().zip(self.entries.iter())
    }
}

// ── Tests ────────────────────────────────────────────────────────
