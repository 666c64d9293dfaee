// ── Counter poller ──
//
// Once per interval, asks every connected datapath for its flow and
// port counters. Replies are not awaited; they come back through the
// transport's event channel. A refused request is logged and the cycle
// moves on to the next device.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::registry::DeviceRegistry;
use crate::transport::Transport;

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollReport {
    pub devices: usize,
    pub requests_sent: usize,
    pub failures: usize,
}

/// Issues counter requests to every registered device.
#[derive(Clone)]
pub struct CounterPoller {
    registry: Arc<DeviceRegistry>,
    transport: Arc<dyn Transport>,
}

impl CounterPoller {
    pub fn new(registry: Arc<DeviceRegistry>, transport: Arc<dyn Transport>) -> Self {
        Self {
            registry,
            transport,
        }
    }

    /// Run a single cycle against the current registry snapshot.
    pub fn poll_once(&self) -> PollReport {
        let targets = self.registry.list_connected();
        let mut report = PollReport {
            devices: targets.len(),
            ..PollReport::default()
        };

        for &datapath in targets.iter() {
            trace!(datapath = %datapath, "send stats request");
            for result in [
                self.transport.request_flow_stats(datapath),
                self.transport.request_port_stats(datapath),
            ] {
                match result {
                    Ok(()) => report.requests_sent += 1,
                    Err(e) => {
                        warn!(datapath = %datapath, error = %e, "stats request failed");
                        report.failures += 1;
                    }
                }
            }
        }
        report
    }

    /// Poll every `period` until `cancel` fires. The first cycle runs
    /// immediately.
    pub async fn run(self, period: Duration, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let report = self.poll_once();
                    trace!(?report, "poll cycle complete");
                }
            }
        }
        debug!("counter poller stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::error::TransportError;
    use crate::model::DatapathId;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Request {
        Flow(DatapathId),
        Port(DatapathId),
    }

    #[derive(Default)]
    struct RecordingTransport {
        sent: Mutex<Vec<Request>>,
        unreachable: Option<DatapathId>,
    }

    impl RecordingTransport {
        fn sent(&self) -> Vec<Request> {
            self.sent.lock().unwrap().clone()
        }

        fn record(&self, req: Request, datapath: DatapathId) -> Result<(), TransportError> {
            if self.unreachable == Some(datapath) {
                return Err(TransportError::Unavailable {
                    datapath,
                    reason: "link down".into(),
                });
            }
            self.sent.lock().unwrap().push(req);
            Ok(())
        }
    }

    impl Transport for RecordingTransport {
        fn request_flow_stats(&self, datapath: DatapathId) -> Result<(), TransportError> {
            self.record(Request::Flow(datapath), datapath)
        }

        fn request_port_stats(&self, datapath: DatapathId) -> Result<(), TransportError> {
            self.record(Request::Port(datapath), datapath)
        }
    }

    fn setup(unreachable: Option<u64>) -> (Arc<DeviceRegistry>, Arc<RecordingTransport>, CounterPoller) {
        let registry = Arc::new(DeviceRegistry::new());
        let transport = Arc::new(RecordingTransport {
            unreachable: unreachable.map(DatapathId::new),
            ..RecordingTransport::default()
        });
        let poller = CounterPoller::new(Arc::clone(&registry), transport.clone());
        (registry, transport, poller)
    }

    #[test]
    fn requests_flow_and_port_counters_from_each_device() {
        let (registry, transport, poller) = setup(None);
        registry.on_connect(DatapathId::new(2));
        registry.on_connect(DatapathId::new(1));

        let report = poller.poll_once();
        assert_eq!(report.devices, 2);
        assert_eq!(report.requests_sent, 4);
        assert_eq!(
            transport.sent(),
            vec![
                Request::Flow(DatapathId::new(1)),
                Request::Port(DatapathId::new(1)),
                Request::Flow(DatapathId::new(2)),
                Request::Port(DatapathId::new(2)),
            ]
        );
    }

    #[test]
    fn disconnected_device_is_not_polled() {
        let (registry, transport, poller) = setup(None);
        registry.on_connect(DatapathId::new(1));
        registry.on_disconnect(DatapathId::new(1));

        assert_eq!(poller.poll_once(), PollReport::default());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn failing_device_does_not_stop_the_cycle() {
        let (registry, transport, poller) = setup(Some(1));
        registry.on_connect(DatapathId::new(1));
        registry.on_connect(DatapathId::new(2));

        let report = poller.poll_once();
        assert_eq!(report.failures, 2);
        assert_eq!(report.requests_sent, 2);
        assert_eq!(transport.sent().len(), 2);
        assert!(registry.contains(DatapathId::new(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_on_every_tick_until_cancelled() {
        let (registry, transport, poller) = setup(None);
        registry.on_connect(DatapathId::new(1));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poller.run(Duration::from_millis(500), cancel.clone()));

        // Immediate first cycle, then one per period.
        tokio::time::sleep(Duration::from_millis(1_250)).await;
        assert_eq!(transport.sent().len(), 6);

        cancel.cancel();
        handle.await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.sent().len(), 6);
    }
}
