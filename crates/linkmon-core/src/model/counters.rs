// ── Counter snapshot entries ──
//
// One flow-table or port-table row as reported by a switch in reply to
// a counter request. Entries are consumed once and discarded; only the
// engine's baselines survive a cycle.

use serde::{Deserialize, Serialize};

use super::ids::{DatapathId, MacAddress, PortNo};

/// A single flow-table entry with its cumulative counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowStats {
    pub priority: u16,
    pub in_port: PortNo,
    pub eth_src: MacAddress,
    pub eth_dst: MacAddress,
    /// Port of the first output action. `None` for entries that drop or
    /// punt to the controller.
    pub out_port: Option<PortNo>,
    pub packet_count: u64,
    pub byte_count: u64,
}

/// Cumulative counters for one switch port.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStats {
    pub port_no: PortNo,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub tx_packets: u64,
    pub tx_bytes: u64,
    pub tx_errors: u64,
}

/// Identity of a flow entry across snapshots.
///
/// Byte-count baselines are kept per flow so that an endpoint with
/// several flows through the monitored port accumulates all of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct FlowKey {
    pub datapath: DatapathId,
    pub in_port: PortNo,
    pub eth_src: MacAddress,
    pub eth_dst: MacAddress,
}

impl FlowKey {
    pub(crate) fn new(datapath: DatapathId, stat: &FlowStats) -> Self {
        Self {
            datapath,
            in_port: stat.in_port,
            eth_src: stat.eth_src.clone(),
            eth_dst: stat.eth_dst.clone(),
        }
    }
}
