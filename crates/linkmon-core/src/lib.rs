// linkmon-core: Counter polling and link-utilization engine.

pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod model;
pub mod monitor;
pub mod poller;
pub mod queue;
pub mod registry;
pub mod sim;
pub mod transport;

// ── Primary re-exports ──────────────────────────────────────────────
pub use config::{DiagnosticsConfig, LinkTap, MonitorConfig, QueueSamplerConfig, Topology};
pub use engine::{FlowCycle, Smoothing, UtilizationEngine};
pub use error::{CoreError, TransportError};
pub use monitor::Monitor;
pub use poller::{CounterPoller, PollReport};
pub use queue::{QueueDepth, QueueSampler, TcQueueSampler};
pub use registry::DeviceRegistry;
pub use sim::{SimEndpoint, SimFabric, SimLayout};
pub use transport::{EventSender, Transport, TransportEvent};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    DatapathId, EndpointUtilization, FlowStats, LinkUtilization, MacAddress, PortNo, PortStats,
    UtilizationReading,
};
