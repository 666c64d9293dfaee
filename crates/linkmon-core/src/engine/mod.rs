// ── Utilization engine ──
//
// Turns counter snapshots into utilization figures. Flow replies from
// endpoint taps feed per-endpoint fair-share utilization; port replies
// from the link tap feed the link-wide figure. The two paths touch
// disjoint state and may run concurrently.

mod baselines;
mod smoothing;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub use smoothing::{EWMA_HISTORY_WEIGHT, Smoothing};

use self::baselines::{CounterBaselines, CounterDelta};
use crate::config::{MonitorConfig, Topology};
use crate::error::CoreError;
use crate::model::{
    DatapathId, EndpointUtilization, FlowKey, FlowStats, LinkUtilization, MacAddress, PortStats,
};

/// Summary of one flow-counter reply.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowCycle {
    /// Endpoints that shared capacity this cycle (the fair-share divisor).
    pub active_endpoints: usize,
    /// Endpoints whose first reading was stored as a baseline.
    pub new_baselines: usize,
    /// Endpoints whose counters went backwards this cycle.
    pub regressions: usize,
    /// `true` if utilization could not be computed for lack of capacity.
    pub capacity_unset: bool,
}

/// Owns counter baselines, derived utilization state, and the
/// bottleneck capacity. Mutation happens only through the two snapshot
/// handlers and [`set_bottleneck_capacity`](Self::set_bottleneck_capacity).
pub struct UtilizationEngine {
    topology: Topology,
    interval_secs: f64,
    calibration_factor: f64,
    smoothing: Smoothing,
    capacity: watch::Sender<Option<u64>>,
    baselines: CounterBaselines,
    endpoints: DashMap<MacAddress, EndpointUtilization>,
    link: watch::Sender<LinkUtilization>,
    /// Set once the "capacity unset" warning has been logged.
    capacity_warned: AtomicBool,
}

impl UtilizationEngine {
    pub fn new(config: &MonitorConfig) -> Self {
        let (capacity, _) = watch::channel(config.bottleneck_capacity_bps.filter(|c| *c > 0));
        let (link, _) = watch::channel(LinkUtilization::default());
        Self {
            topology: config.topology.clone(),
            interval_secs: config.interval_secs(),
            calibration_factor: config.calibration_factor,
            smoothing: config.smoothing,
            capacity,
            baselines: CounterBaselines::default(),
            endpoints: DashMap::new(),
            link,
            capacity_warned: AtomicBool::new(false),
        }
    }

    // ── Configuration ────────────────────────────────────────────────

    /// Replace the bottleneck capacity (bytes/second). Applies from the
    /// next snapshot; already reported values are not recomputed.
    pub fn set_bottleneck_capacity(&self, bytes_per_sec: u64) -> Result<(), CoreError> {
        if bytes_per_sec == 0 {
            return Err(CoreError::InvalidCapacity {
                value: bytes_per_sec,
            });
        }
        let previous = self.capacity.send_replace(Some(bytes_per_sec));
        self.capacity_warned.store(false, Ordering::Relaxed);
        info!(
            capacity = %bytesize::ByteSize(bytes_per_sec),
            ?previous,
            "bottleneck capacity updated"
        );
        Ok(())
    }

    pub fn bottleneck_capacity(&self) -> Option<u64> {
        *self.capacity.borrow()
    }

    pub fn smoothing(&self) -> Smoothing {
        self.smoothing
    }

    // ── Snapshot handlers ────────────────────────────────────────────

    /// Process a flow-counter reply from `datapath`.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn on_flow_stats(&self, datapath: DatapathId, entries: &[FlowStats]) -> FlowCycle {
        let Some(egress) = self.topology.endpoint_egress(datapath) else {
            debug!(datapath = %datapath, "flow stats from datapath without endpoint tap");
            return FlowCycle::default();
        };

        let mut measured: Vec<&FlowStats> = entries
            .iter()
            .filter(|f| f.priority == self.topology.user_priority)
            .collect();
        measured.sort_by(|a, b| (a.in_port, &a.eth_dst).cmp(&(b.in_port, &b.eth_dst)));

        let mut cycle = FlowCycle::default();
        let mut increments: BTreeMap<MacAddress, u64> = BTreeMap::new();
        for stat in measured {
            debug!(
                datapath = %datapath,
                in_port = stat.in_port,
                eth_src = %stat.eth_src,
                eth_dst = %stat.eth_dst,
                out_port = ?stat.out_port,
                packets = stat.packet_count,
                bytes = stat.byte_count,
                "flow entry"
            );
            if stat.out_port != Some(egress) {
                continue;
            }
            match self
                .baselines
                .flow_delta(FlowKey::new(datapath, stat), stat.byte_count)
            {
                CounterDelta::Baseline => cycle.new_baselines += 1,
                CounterDelta::Increment(inc) => {
                    *increments.entry(stat.eth_src.clone()).or_default() += inc;
                }
                CounterDelta::Regressed => {
                    warn!(
                        datapath = %datapath,
                        eth_src = %stat.eth_src,
                        bytes = stat.byte_count,
                        "flow byte counter went backwards; baseline reset"
                    );
                    cycle.regressions += 1;
                    increments.entry(stat.eth_src.clone()).or_default();
                }
            }
        }

        let active = increments.len();
        cycle.active_endpoints = active;
        if active == 0 {
            return cycle;
        }

        let capacity = self.bottleneck_capacity();
        cycle.capacity_unset = capacity.is_none();
        if capacity.is_none() {
            self.warn_capacity_unset();
        }
        // Each active endpoint is entitled to an equal slice of what the
        // bottleneck can carry in one interval.
        let fair_share_bytes =
            capacity.map(|c| c as f64 * self.interval_secs / active as f64);

        let now = Utc::now();
        for (mac, inc) in increments {
            let utilization =
                fair_share_bytes.map(|share| inc as f64 / share / self.calibration_factor);
            let sending_rate_bps = inc as f64 / self.interval_secs * 8.0;
            self.endpoints.insert(
                mac.clone(),
                EndpointUtilization {
                    mac,
                    utilization,
                    sending_rate_bps,
                    increment_bytes: inc,
                    active_endpoints: active,
                    updated_at: now,
                },
            );
        }

        info!(
            datapath = %datapath,
            active,
            utilization = ?self.endpoint_summary(),
            "users utilization"
        );
        cycle
    }

    /// Process a port-counter reply from `datapath`. Returns the new link
    /// figures if this reply updated them.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub fn on_port_stats(
        &self,
        datapath: DatapathId,
        entries: &[PortStats],
    ) -> Option<LinkUtilization> {
        let tap = self.topology.link_tap.filter(|t| t.datapath == datapath)?;
        let Some(stat) = entries.iter().find(|p| p.port_no == tap.ingress_port) else {
            debug!(
                datapath = %datapath,
                port = tap.ingress_port,
                "port stats reply lacks the monitored port"
            );
            return None;
        };

        let increment = match self.baselines.port_delta(
            datapath,
            tap.ingress_port,
            stat.rx_bytes,
            self.smoothing,
        ) {
            CounterDelta::Baseline => {
                debug!(datapath = %datapath, rx_bytes = stat.rx_bytes, "link baseline established");
                return None;
            }
            CounterDelta::Regressed => {
                warn!(
                    datapath = %datapath,
                    port = tap.ingress_port,
                    rx_bytes = stat.rx_bytes,
                    "rx byte counter went backwards; baseline reset"
                );
                0.0
            }
            CounterDelta::Increment(inc) => inc,
        };

        let capacity = self.bottleneck_capacity();
        if capacity.is_none() {
            self.warn_capacity_unset();
        }
        let link = LinkUtilization {
            utilization: capacity.map(|c| increment / c as f64 / self.interval_secs),
            sending_rate_bps: increment / self.interval_secs * 8.0,
            increment_bytes: increment,
            updated_at: Some(Utc::now()),
        };
        info!(
            interval_secs = self.interval_secs,
            increment_bytes = increment,
            utilization = ?link.utilization,
            "link utilization"
        );
        self.link.send_replace(link.clone());
        Some(link)
    }

    // ── Readout ──────────────────────────────────────────────────────

    pub fn link(&self) -> LinkUtilization {
        self.link.borrow().clone()
    }

    pub fn subscribe_link(&self) -> watch::Receiver<LinkUtilization> {
        self.link.subscribe()
    }

    pub fn endpoint(&self, mac: &MacAddress) -> Option<EndpointUtilization> {
        self.endpoints.get(mac).map(|r| r.value().clone())
    }

    /// All endpoints ever reported, ordered by address.
    pub fn endpoints(&self) -> Vec<EndpointUtilization> {
        let mut all: Vec<EndpointUtilization> =
            self.endpoints.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.mac.cmp(&b.mac));
        all
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn endpoint_summary(&self) -> BTreeMap<String, Option<f64>> {
        self.endpoints
            .iter()
            .map(|r| (r.key().to_string(), r.value().utilization))
            .collect()
    }

    fn warn_capacity_unset(&self) {
        if !self.capacity_warned.swap(true, Ordering::Relaxed) {
            warn!("bottleneck capacity is not configured; utilization unavailable");
        }
    }
}
