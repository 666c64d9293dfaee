// ── Domain model ──
//
// Identifiers, counter snapshot rows, and the utilization figures the
// engine derives from them.

mod counters;
mod ids;
mod utilization;

pub(crate) use counters::FlowKey;
pub use counters::{FlowStats, PortStats};
pub use ids::{DatapathId, MacAddress, PortNo};
pub use utilization::{EndpointUtilization, LinkUtilization, UtilizationReading};
