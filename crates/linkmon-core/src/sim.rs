// ── Simulated switch fabric ──
//
// An in-process transport modelling the reference deployment: endpoints
// hang off an access switch that forwards their traffic out of one
// egress port, across a bottleneck link, into an aggregation switch.
// Counters are integrated from per-endpoint send rates over the tokio
// clock, so paused-time tests get exact, repeatable figures.

use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::{DEFAULT_USER_PRIORITY, LinkTap, Topology};
use crate::error::TransportError;
use crate::model::{DatapathId, FlowStats, MacAddress, PortNo, PortStats};
use crate::queue::{QueueDepth, QueueSampler};
use crate::transport::{EventSender, Transport, TransportEvent};

/// Backlog ceiling of the simulated bottleneck queue.
pub const DEFAULT_QUEUE_LIMIT_BYTES: u64 = 1_000_000;

/// Access-switch port of the reference uplink towards the bottleneck.
pub const REFERENCE_UPLINK_PORT: PortNo = 3;

/// Physical layout of the simulated network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimLayout {
    pub access: DatapathId,
    /// Port on the access switch that leads to the bottleneck.
    pub egress_port: PortNo,
    pub aggregation: DatapathId,
    /// Port on the aggregation switch where the bottleneck terminates.
    pub link_port: PortNo,
    /// Bottleneck rate in bytes/second.
    pub link_capacity_bps: u64,
    pub queue_limit_bytes: u64,
}

impl SimLayout {
    /// Two switches wired like [`Topology::reference`].
    pub fn reference(link_capacity_bps: u64) -> Self {
        Self {
            access: DatapathId::new(1),
            egress_port: REFERENCE_UPLINK_PORT,
            aggregation: DatapathId::new(2),
            link_port: 2,
            link_capacity_bps,
            queue_limit_bytes: DEFAULT_QUEUE_LIMIT_BYTES,
        }
    }

    /// The measurement taps matching this layout.
    pub fn topology(&self) -> Topology {
        Topology {
            user_priority: DEFAULT_USER_PRIORITY,
            endpoint_taps: [(self.access, self.egress_port)].into(),
            link_tap: Some(LinkTap {
                datapath: self.aggregation,
                ingress_port: self.link_port,
            }),
        }
    }
}

/// A host attached to the access switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimEndpoint {
    pub mac: MacAddress,
    pub access_port: PortNo,
    /// Offered load in bytes/second.
    pub rate_bps: u64,
}

impl SimEndpoint {
    /// Host `index`, using the synthetic address the query surface maps
    /// endpoint ids to. Hosts take access ports in order, stepping over
    /// the reference uplink.
    pub fn numbered(index: u32, rate_bps: u64) -> Option<Self> {
        let mac = MacAddress::from_endpoint_index(index).ok()?;
        let access_port = if index < REFERENCE_UPLINK_PORT {
            index
        } else {
            index + 1
        };
        Some(Self {
            mac,
            access_port,
            rate_bps,
        })
    }
}

struct HostState {
    spec: SimEndpoint,
    sent_bytes: f64,
}

struct FabricState {
    hosts: Vec<HostState>,
    link_rx_bytes: f64,
    backlog_bytes: f64,
    last_advance: Instant,
    connected: BTreeSet<DatapathId>,
}

/// Deterministic stand-in for a switch controller connection.
///
/// Implements [`Transport`] (counter replies are delivered immediately
/// on the attached event channel) and [`QueueSampler`] (reports the
/// simulated bottleneck backlog).
pub struct SimFabric {
    layout: SimLayout,
    events: OnceLock<EventSender>,
    state: Mutex<FabricState>,
}

impl SimFabric {
    pub fn new(layout: SimLayout, endpoints: Vec<SimEndpoint>) -> Self {
        let hosts = endpoints
            .into_iter()
            .map(|spec| HostState {
                spec,
                sent_bytes: 0.0,
            })
            .collect();
        Self {
            layout,
            events: OnceLock::new(),
            state: Mutex::new(FabricState {
                hosts,
                link_rx_bytes: 0.0,
                backlog_bytes: 0.0,
                last_advance: Instant::now(),
                connected: BTreeSet::new(),
            }),
        }
    }

    pub fn layout(&self) -> &SimLayout {
        &self.layout
    }

    /// Attach the channel replies and lifecycle events are sent on.
    /// Only the first call has an effect.
    pub fn attach(&self, events: EventSender) {
        if self.events.set(events).is_err() {
            debug!("sim fabric already attached");
        }
    }

    /// Bring both switches up.
    pub fn connect_all(&self) -> Result<(), TransportError> {
        for datapath in [self.layout.access, self.layout.aggregation] {
            self.lock().connected.insert(datapath);
            self.emit(TransportEvent::DeviceConnected(datapath))?;
        }
        Ok(())
    }

    pub fn disconnect(&self, datapath: DatapathId) -> Result<(), TransportError> {
        if self.lock().connected.remove(&datapath) {
            self.emit(TransportEvent::DeviceDisconnected(datapath))?;
        }
        Ok(())
    }

    /// Change one endpoint's offered load. Returns `false` for an unknown address.
    pub fn set_rate(&self, mac: &MacAddress, rate_bps: u64) -> bool {
        let mut state = self.lock();
        state.advance(&self.layout, Instant::now());
        match state.hosts.iter_mut().find(|h| &h.spec.mac == mac) {
            Some(host) => {
                host.spec.rate_bps = rate_bps;
                true
            }
            None => false,
        }
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, FabricState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: TransportEvent) -> Result<(), TransportError> {
        let tx = self.events.get().ok_or(TransportError::ChannelClosed)?;
        tx.send(event).map_err(|_| TransportError::ChannelClosed)
    }

    /// Take a snapshot for `datapath`, failing if it is not connected.
    fn snapshot<T>(
        &self,
        datapath: DatapathId,
        build: impl FnOnce(&FabricState, &SimLayout) -> T,
    ) -> Result<T, TransportError> {
        let mut state = self.lock();
        if !state.connected.contains(&datapath) {
            return Err(TransportError::Unavailable {
                datapath,
                reason: "switch not connected".into(),
            });
        }
        state.advance(&self.layout, Instant::now());
        Ok(build(&state, &self.layout))
    }
}

impl FabricState {
    /// Integrate counters up to `now`. Traffic beyond the bottleneck
    /// rate accumulates in the queue; the link delivers at most its
    /// capacity.
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    fn advance(&mut self, layout: &SimLayout, now: Instant) {
        let dt = now.saturating_duration_since(self.last_advance).as_secs_f64();
        self.last_advance = now;
        if dt <= 0.0 {
            return;
        }

        let capacity = layout.link_capacity_bps as f64;
        let mut offered = 0.0;
        for host in &mut self.hosts {
            let bytes = host.spec.rate_bps as f64 * dt;
            host.sent_bytes += bytes;
            offered += bytes;
        }

        let available = self.backlog_bytes + offered;
        let delivered = available.min(capacity * dt);
        self.link_rx_bytes += delivered;
        self.backlog_bytes = (available - delivered).min(layout.queue_limit_bytes as f64);
        trace!(dt, offered, delivered, backlog = self.backlog_bytes, "sim fabric advanced");
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::as_conversions
    )]
    fn flow_table(&self, layout: &SimLayout) -> Vec<FlowStats> {
        let mut flows = Vec::with_capacity(self.hosts.len() * 2 + 1);
        // Table-miss entry punting to the controller.
        flows.push(FlowStats {
            priority: 0,
            in_port: 0,
            eth_src: MacAddress::new("00:00:00:00:00:00"),
            eth_dst: MacAddress::new("00:00:00:00:00:00"),
            out_port: None,
            packet_count: self.hosts.len() as u64,
            byte_count: 64 * self.hosts.len() as u64,
        });
        for host in &self.hosts {
            let sent = host.sent_bytes as u64;
            flows.push(FlowStats {
                priority: DEFAULT_USER_PRIORITY,
                in_port: host.spec.access_port,
                eth_src: host.spec.mac.clone(),
                eth_dst: MacAddress::new("00:00:00:00:00:fe"),
                out_port: Some(layout.egress_port),
                packet_count: sent / 1_500,
                byte_count: sent,
            });
            // Acknowledgements flowing back towards the host.
            flows.push(FlowStats {
                priority: DEFAULT_USER_PRIORITY,
                in_port: layout.egress_port,
                eth_src: MacAddress::new("00:00:00:00:00:fe"),
                eth_dst: host.spec.mac.clone(),
                out_port: Some(host.spec.access_port),
                packet_count: sent / 1_500,
                byte_count: sent / 1_500 * 66,
            });
        }
        flows
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::as_conversions
    )]
    fn port_table(&self, layout: &SimLayout, datapath: DatapathId) -> Vec<PortStats> {
        if datapath == layout.aggregation {
            let rx = self.link_rx_bytes as u64;
            return vec![
                PortStats {
                    port_no: 1,
                    tx_bytes: rx,
                    tx_packets: rx / 1_500,
                    ..PortStats::default()
                },
                PortStats {
                    port_no: layout.link_port,
                    rx_bytes: rx,
                    rx_packets: rx / 1_500,
                    ..PortStats::default()
                },
            ];
        }
        self.hosts
            .iter()
            .map(|h| {
                let sent = h.sent_bytes as u64;
                PortStats {
                    port_no: h.spec.access_port,
                    rx_bytes: sent,
                    rx_packets: sent / 1_500,
                    ..PortStats::default()
                }
            })
            .collect()
    }
}

impl Transport for SimFabric {
    fn request_flow_stats(&self, datapath: DatapathId) -> Result<(), TransportError> {
        let entries = self.snapshot(datapath, |state, layout| {
            if datapath == layout.access {
                state.flow_table(layout)
            } else {
                Vec::new()
            }
        })?;
        self.emit(TransportEvent::FlowStats { datapath, entries })
    }

    fn request_port_stats(&self, datapath: DatapathId) -> Result<(), TransportError> {
        let entries = self.snapshot(datapath, |state, layout| state.port_table(layout, datapath))?;
        self.emit(TransportEvent::PortStats { datapath, entries })
    }
}

impl QueueSampler for SimFabric {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::as_conversions
    )]
    fn sample(&self, _interface: &str) -> QueueDepth {
        let mut state = self.lock();
        state.advance(&self.layout, Instant::now());
        QueueDepth::Bytes(state.backlog_bytes as u64)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;

    fn fabric(rates: &[u64]) -> (SimFabric, mpsc::UnboundedReceiver<TransportEvent>) {
        let endpoints = rates
            .iter()
            .zip(1..)
            .map(|(&rate, i)| SimEndpoint::numbered(i, rate).unwrap())
            .collect();
        let fabric = SimFabric::new(SimLayout::reference(490_000), endpoints);
        let (tx, rx) = mpsc::unbounded_channel();
        fabric.attach(tx);
        (fabric, rx)
    }

    #[test]
    fn numbered_hosts_skip_the_uplink_port() {
        let ports: Vec<PortNo> = (1..=4)
            .map(|i| SimEndpoint::numbered(i, 0).unwrap().access_port)
            .collect();
        assert_eq!(ports, vec![1, 2, 4, 5]);
        assert!(SimEndpoint::numbered(0, 0).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn only_forward_flows_leave_through_the_uplink() {
        let (fabric, mut rx) = fabric(&[1_000, 1_000, 1_000]);
        fabric.connect_all().unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        fabric.request_flow_stats(DatapathId::new(1)).unwrap();
        let TransportEvent::FlowStats { entries, .. } = rx.recv().await.unwrap() else {
            panic!("expected flow stats");
        };
        let sources: Vec<&str> = entries
            .iter()
            .filter(|f| f.out_port == Some(REFERENCE_UPLINK_PORT))
            .map(|f| f.eth_src.as_str())
            .collect();
        assert_eq!(
            sources,
            vec!["00:00:00:00:00:01", "00:00:00:00:00:02", "00:00:00:00:00:03"]
        );
    }

    #[test]
    fn layout_topology_matches_reference() {
        assert_eq!(SimLayout::reference(1).topology(), Topology::reference());
    }

    #[tokio::test]
    async fn connect_all_announces_both_switches() {
        let (fabric, mut rx) = fabric(&[]);
        fabric.connect_all().unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::DeviceConnected(DatapathId::new(1))
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            TransportEvent::DeviceConnected(DatapathId::new(2))
        );
    }

    #[tokio::test]
    async fn requests_to_disconnected_switch_fail() {
        let (fabric, _rx) = fabric(&[1_000]);
        assert!(matches!(
            fabric.request_flow_stats(DatapathId::new(1)),
            Err(TransportError::Unavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn counters_integrate_send_rate() {
        let (fabric, mut rx) = fabric(&[49_000]);
        fabric.connect_all().unwrap();
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        fabric.request_flow_stats(DatapathId::new(1)).unwrap();
        let TransportEvent::FlowStats { entries, .. } = rx.recv().await.unwrap() else {
            panic!("expected flow stats");
        };
        let user = entries
            .iter()
            .find(|f| f.out_port == Some(3))
            .unwrap();
        assert_eq!(user.byte_count, 24_500);
        assert!(entries.iter().any(|f| f.priority == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn overload_builds_a_queue_and_caps_the_link() {
        let (fabric, mut rx) = fabric(&[400_000, 400_000]);
        fabric.connect_all().unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;

        fabric.request_port_stats(DatapathId::new(2)).unwrap();
        let event = loop {
            let ev = rx.recv().await.unwrap();
            if matches!(ev, TransportEvent::PortStats { .. }) {
                break ev;
            }
        };
        let TransportEvent::PortStats { entries, .. } = event else {
            unreachable!()
        };
        let link = entries.iter().find(|p| p.port_no == 2).unwrap();
        assert_eq!(link.rx_bytes, 490_000);
        assert_eq!(fabric.sample("r1-eth2"), QueueDepth::Bytes(310_000));
    }

    #[tokio::test(start_paused = true)]
    async fn set_rate_changes_future_counters_only() {
        let (fabric, _rx) = fabric(&[10_000]);
        let mac = MacAddress::from_endpoint_index(1).unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(fabric.set_rate(&mac, 0));
        assert!(!fabric.set_rate(&MacAddress::new("aa:bb:cc:dd:ee:ff"), 1));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(fabric.lock().hosts[0].sent_bytes as u64, 10_000);
    }

    #[tokio::test]
    async fn disconnect_emits_once() {
        let (fabric, mut rx) = fabric(&[]);
        fabric.connect_all().unwrap();
        fabric.disconnect(DatapathId::new(1)).unwrap();
        fabric.disconnect(DatapathId::new(1)).unwrap();
        drop(fabric);
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            TransportEvent::DeviceDisconnected(DatapathId::new(1))
        );
    }
}
