// ── Derived utilization figures ──

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::ids::MacAddress;
use crate::queue::QueueDepth;

/// Link-wide figures derived from the monitored ingress port.
///
/// `utilization` is `None` while no bottleneck capacity is configured;
/// the sending rate does not depend on capacity and is always filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkUtilization {
    pub utilization: Option<f64>,
    pub sending_rate_bps: f64,
    /// Bytes attributed to the last cycle (raw or smoothed).
    pub increment_bytes: f64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for LinkUtilization {
    fn default() -> Self {
        Self {
            utilization: Some(0.0),
            sending_rate_bps: 0.0,
            increment_bytes: 0.0,
            updated_at: None,
        }
    }
}

/// Last reported figures for one endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointUtilization {
    pub mac: MacAddress,
    /// Fraction of the endpoint's fair share; `None` while capacity is unset.
    pub utilization: Option<f64>,
    pub sending_rate_bps: f64,
    pub increment_bytes: u64,
    /// Number of endpoints sharing capacity in the cycle that produced this value.
    pub active_endpoints: usize,
    pub updated_at: DateTime<Utc>,
}

/// Answer to a utilization query: a fraction plus a live queue sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UtilizationReading {
    pub utilization: Option<f64>,
    pub queue_length: QueueDepth,
}
