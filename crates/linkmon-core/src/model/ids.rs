// ── Core identity types ──
//
// DatapathId names a switch, MacAddress names an endpoint. Every
// counter, baseline, and utilization figure is keyed by one of them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// Switch port number as reported in counter replies.
pub type PortNo = u32;

// ── DatapathId ──────────────────────────────────────────────────────

/// Opaque 64-bit identifier of a connected switch.
///
/// Displayed as 16 lowercase hex digits, the way switch controllers
/// conventionally print datapath ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatapathId(u64);

impl DatapathId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl From<u64> for DatapathId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for DatapathId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

// ── MacAddress ──────────────────────────────────────────────────────

/// MAC address, normalized to lowercase colon-separated format (aa:bb:cc:dd:ee:ff).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MacAddress(String);

impl MacAddress {
    /// Create a normalized MAC address from any common format.
    /// Accepts colon-separated or dash-separated hex.
    pub fn new(raw: impl AsRef<str>) -> Self {
        let normalized = raw.as_ref().to_lowercase().replace('-', ":");
        Self(normalized)
    }

    /// Synthetic endpoint address `00:00:00:00:00:NN` for a numeric host index.
    ///
    /// The query surface addresses endpoints by small integers; the
    /// emulated hosts behind the monitored switch carry these addresses.
    pub fn from_endpoint_index(index: u32) -> Result<Self, CoreError> {
        let octet = u8::try_from(index)
            .ok()
            .filter(|o| *o != 0)
            .ok_or(CoreError::InvalidEndpoint { index })?;
        Ok(Self(format!("00:00:00:00:00:{octet:02x}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MacAddress {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}
