// ── Switch transport contract ──
//
// The engine never speaks the switch protocol. A transport owns the
// connections, accepts counter requests, and pushes lifecycle and
// counter-reply events back through a `TransportEvent` channel.

use tokio::sync::mpsc;

use crate::error::TransportError;
use crate::model::{DatapathId, FlowStats, PortStats};

/// Sink for events a transport delivers to the monitor.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Everything a transport reports upward.
#[derive(Debug, Clone, PartialEq, Eq, strum::Display)]
pub enum TransportEvent {
    DeviceConnected(DatapathId),
    DeviceDisconnected(DatapathId),
    FlowStats {
        datapath: DatapathId,
        entries: Vec<FlowStats>,
    },
    PortStats {
        datapath: DatapathId,
        entries: Vec<PortStats>,
    },
}

/// Outgoing half of the transport: fire-and-forget counter requests.
///
/// Implementations must not block waiting for the reply; replies arrive
/// later as [`TransportEvent::FlowStats`] / [`TransportEvent::PortStats`].
pub trait Transport: Send + Sync + 'static {
    fn request_flow_stats(&self, datapath: DatapathId) -> Result<(), TransportError>;

    fn request_port_stats(&self, datapath: DatapathId) -> Result<(), TransportError>;
}
