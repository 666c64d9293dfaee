// ── Runtime monitor configuration ──
//
// These types describe *what* to measure and *how often*. They are
// static for the life of a monitor (except the bottleneck capacity,
// which the engine owns after startup) and never touch disk: the
// binary builds a `MonitorConfig` through `linkmon-config` and hands it in.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::Smoothing;
use crate::error::CoreError;
use crate::model::{DatapathId, PortNo};

/// Interval between counter polls in the reference deployment.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Divisor applied to per-endpoint utilization to compensate for
/// measured framing overhead.
pub const DEFAULT_CALIBRATION_FACTOR: f64 = 0.9;

/// Flow priority the forwarding application installs for user traffic.
pub const DEFAULT_USER_PRIORITY: u16 = 1;

/// Where the link-wide figure is measured: a port on the aggregation switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTap {
    pub datapath: DatapathId,
    pub ingress_port: PortNo,
}

/// Which counters the engine reads, per switch.
///
/// Replaces hard-coded switch/port constants: the engine only knows
/// that some datapaths carry endpoint flows towards an egress port and
/// one datapath carries the bottleneck link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Only flows at this priority are measured; others are control flows.
    pub user_priority: u16,
    /// Datapath -> egress port that endpoint flows must target to count.
    pub endpoint_taps: BTreeMap<DatapathId, PortNo>,
    pub link_tap: Option<LinkTap>,
}

impl Topology {
    /// The two-switch layout the collector was first deployed on: access
    /// switch 1 forwards endpoint flows out of port 3, aggregation switch 2
    /// receives the bottleneck link on port 2.
    pub fn reference() -> Self {
        Self {
            user_priority: DEFAULT_USER_PRIORITY,
            endpoint_taps: BTreeMap::from([(DatapathId::new(1), 3)]),
            link_tap: Some(LinkTap {
                datapath: DatapathId::new(2),
                ingress_port: 2,
            }),
        }
    }

    pub fn endpoint_egress(&self, datapath: DatapathId) -> Option<PortNo> {
        self.endpoint_taps.get(&datapath).copied()
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::reference()
    }
}

/// Placeholder in [`QueueSamplerConfig::args`] replaced by the interface name.
pub const INTERFACE_PLACEHOLDER: &str = "{interface}";

/// How the queue sampler shells out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSamplerConfig {
    pub program: String,
    /// Arguments; any occurrence of `{interface}` is substituted.
    pub args: Vec<String>,
    /// Upper bound on one invocation; expiry yields an unavailable sample.
    pub timeout: Duration,
}

impl QueueSamplerConfig {
    /// Argument list for one invocation against `interface`.
    pub fn args_for(&self, interface: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(INTERFACE_PLACEHOLDER, interface))
            .collect()
    }
}

impl Default for QueueSamplerConfig {
    fn default() -> Self {
        Self {
            program: "tc".into(),
            args: ["-s", "qdisc", "show", "dev", INTERFACE_PLACEHOLDER]
                .map(String::from)
                .to_vec(),
            timeout: Duration::from_secs(2),
        }
    }
}

/// Append-only diagnostic logs written on every poll interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticsConfig {
    pub directory: PathBuf,
}

/// Configuration for a single monitor instance.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Interface whose qdisc backlog is reported as queue length.
    pub interface: String,
    pub poll_interval: Duration,
    pub smoothing: Smoothing,
    pub calibration_factor: f64,
    /// Initial bottleneck capacity in bytes/second. `None` = unset.
    pub bottleneck_capacity_bps: Option<u64>,
    pub topology: Topology,
    pub queue: QueueSamplerConfig,
    /// `None` disables the diagnostics recorder.
    pub diagnostics: Option<DiagnosticsConfig>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interface: "r1-eth2".into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            smoothing: Smoothing::default(),
            calibration_factor: DEFAULT_CALIBRATION_FACTOR,
            bottleneck_capacity_bps: None,
            topology: Topology::reference(),
            queue: QueueSamplerConfig::default(),
            diagnostics: None,
        }
    }
}

impl MonitorConfig {
    /// Poll interval in seconds, the time base of every rate computation.
    pub fn interval_secs(&self) -> f64 {
        self.poll_interval.as_secs_f64()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interface.trim().is_empty() {
            return Err(invalid("interface", "must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(invalid("poll_interval", "must be greater than zero"));
        }
        if !(self.calibration_factor > 0.0 && self.calibration_factor <= 1.0) {
            return Err(invalid(
                "calibration_factor",
                &format!("expected a value in (0, 1], got {}", self.calibration_factor),
            ));
        }
        if self.bottleneck_capacity_bps == Some(0) {
            return Err(invalid("bottleneck_capacity_bps", "must be positive"));
        }
        if self.queue.program.trim().is_empty() {
            return Err(invalid("queue.program", "must not be empty"));
        }
        if self.queue.timeout.is_zero() {
            return Err(invalid("queue.timeout", "must be greater than zero"));
        }
        if self.topology.endpoint_taps.is_empty() && self.topology.link_tap.is_none() {
            return Err(invalid("topology", "no endpoint or link tap configured"));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> CoreError {
    CoreError::ValidationFailed {
        field: field.into(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(MonitorConfig::default().validate().is_ok());
    }

    #[test]
    fn reference_topology_taps() {
        let topo = Topology::reference();
        assert_eq!(topo.endpoint_egress(DatapathId::new(1)), Some(3));
        assert_eq!(topo.endpoint_egress(DatapathId::new(2)), None);
        assert_eq!(
            topo.link_tap,
            Some(LinkTap {
                datapath: DatapathId::new(2),
                ingress_port: 2
            })
        );
    }

    #[test]
    fn calibration_above_one_is_rejected() {
        let cfg = MonitorConfig {
            calibration_factor: 1.5,
            ..MonitorConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(CoreError::ValidationFailed { ref field, .. }) if field == "calibration_factor"
        ));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let cfg = MonitorConfig {
            poll_interval: Duration::ZERO,
            ..MonitorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn queue_args_substitute_interface() {
        let queue = QueueSamplerConfig::default();
        assert_eq!(
            queue.args_for("r1-eth2"),
            vec!["-s", "qdisc", "show", "dev", "r1-eth2"]
        );
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let cfg = MonitorConfig {
            bottleneck_capacity_bps: Some(0),
            ..MonitorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
