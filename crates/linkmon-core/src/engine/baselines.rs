// ── Counter baselines ──
//
// The only state that survives a snapshot: the last cumulative byte
// count per flow and the last (raw or smoothed) rx_bytes per port.
// Each read-modify-write goes through a DashMap entry, so the delta for
// one key is atomic with its baseline update.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::smoothing::Smoothing;
use crate::model::{DatapathId, FlowKey, PortNo};

/// What a new cumulative reading means relative to the stored baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum CounterDelta<T> {
    /// First reading for this key; stored, nothing to report.
    Baseline,
    Increment(T),
    /// Reading went backwards; baseline reset, zero reported.
    Regressed,
}

#[derive(Default)]
pub(crate) struct CounterBaselines {
    flows: DashMap<FlowKey, u64>,
    ports: DashMap<(DatapathId, PortNo), f64>,
}

impl CounterBaselines {
    pub(crate) fn flow_delta(&self, key: FlowKey, byte_count: u64) -> CounterDelta<u64> {
        match self.flows.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(byte_count);
                CounterDelta::Baseline
            }
            Entry::Occupied(mut slot) => {
                let previous = slot.insert(byte_count);
                match byte_count.checked_sub(previous) {
                    Some(inc) => CounterDelta::Increment(inc),
                    None => CounterDelta::Regressed,
                }
            }
        }
    }

    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    pub(crate) fn port_delta(
        &self,
        datapath: DatapathId,
        port: PortNo,
        rx_bytes: u64,
        smoothing: Smoothing,
    ) -> CounterDelta<f64> {
        match self.ports.entry((datapath, port)) {
            Entry::Vacant(slot) => {
                slot.insert(rx_bytes as f64);
                CounterDelta::Baseline
            }
            Entry::Occupied(mut slot) => {
                let step = smoothing.step(*slot.get(), rx_bytes);
                slot.insert(step.baseline);
                if step.regressed {
                    CounterDelta::Regressed
                } else {
                    CounterDelta::Increment(step.increment)
                }
            }
        }
    }
}
