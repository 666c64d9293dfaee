// ── Core error types ──
//
// Errors that cross the engine boundary. Per-device, per-cycle failures
// (a refused counter request, an unparseable queue sample) are logged
// where they happen and never reach this type; only caller mistakes and
// lifecycle problems do.

use thiserror::Error;

use crate::model::DatapathId;

/// Failure reported by a transport when a counter request cannot be sent.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("datapath {datapath} is not reachable: {reason}")]
    Unavailable { datapath: DatapathId, reason: String },

    #[error("transport channel closed")]
    ChannelClosed,
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation errors ────────────────────────────────────────────
    #[error("Bottleneck capacity must be a positive number of bytes per second, got {value}")]
    InvalidCapacity { value: u64 },

    #[error("Endpoint index {index} is outside 1..=255")]
    InvalidEndpoint { index: u32 },

    #[error("Validation failed for {field}: {reason}")]
    ValidationFailed { field: String, reason: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Monitor is already running")]
    AlreadyStarted,

    #[error("Monitor has been shut down")]
    ShutDown,

    // ── Wrapped errors ───────────────────────────────────────────────
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Diagnostics log I/O failed: {0}")]
    Io(#[from] std::io::Error),
}
