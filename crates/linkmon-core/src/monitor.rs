// ── Monitor facade ──
//
// Ties the registry, poller, engine, and queue sampler together behind
// one cheaply cloneable handle. Background tasks (event pump, poller,
// optional diagnostics recorder) are spawned by `start` and stopped by
// `shutdown`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::diagnostics::{DiagnosticsRecorder, DiagnosticsSample};
use crate::engine::UtilizationEngine;
use crate::error::CoreError;
use crate::model::{
    DatapathId, EndpointUtilization, LinkUtilization, MacAddress, UtilizationReading,
};
use crate::poller::CounterPoller;
use crate::queue::{QueueDepth, QueueSampler};
use crate::registry::DeviceRegistry;
use crate::transport::{EventSender, Transport, TransportEvent};

// ── Monitor ──────────────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<MonitorInner>`. Create with
/// [`new`](Self::new), hand [`event_sender`](Self::event_sender) to the
/// transport, then call [`start`](Self::start).
#[derive(Clone)]
pub struct Monitor {
    inner: Arc<MonitorInner>,
}

struct MonitorInner {
    config: MonitorConfig,
    registry: Arc<DeviceRegistry>,
    engine: UtilizationEngine,
    sampler: Arc<dyn QueueSampler>,
    event_tx: EventSender,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<TransportEvent>>>,
    cancel: CancellationToken,
    started: AtomicBool,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Monitor {
    /// Validate `config` and build an idle monitor. Nothing runs until
    /// [`start()`](Self::start).
    pub fn new(config: MonitorConfig, sampler: Arc<dyn QueueSampler>) -> Result<Self, CoreError> {
        config.validate()?;
        let engine = UtilizationEngine::new(&config);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Ok(Self {
            inner: Arc::new(MonitorInner {
                config,
                registry: Arc::new(DeviceRegistry::new()),
                engine,
                sampler,
                event_tx,
                event_rx: Mutex::new(Some(event_rx)),
                cancel: CancellationToken::new(),
                started: AtomicBool::new(false),
                task_handles: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.inner.registry
    }

    /// Channel on which a transport delivers its events.
    pub fn event_sender(&self) -> EventSender {
        self.inner.event_tx.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Spawn the event pump, the counter poller, and (if configured) the
    /// diagnostics recorder.
    pub async fn start(&self, transport: Arc<dyn Transport>) -> Result<(), CoreError> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoreError::ShutDown);
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyStarted);
        }

        let config = &self.inner.config;
        let recorder = match &config.diagnostics {
            Some(diag) => Some(DiagnosticsRecorder::open(diag).await?),
            None => None,
        };

        let mut handles = self.inner.task_handles.lock().await;

        if let Some(rx) = self.inner.event_rx.lock().await.take() {
            let monitor = self.clone();
            handles.push(tokio::spawn(event_pump_task(monitor, rx)));
        }

        let poller = CounterPoller::new(Arc::clone(&self.inner.registry), transport);
        handles.push(tokio::spawn(
            poller.run(config.poll_interval, self.inner.cancel.clone()),
        ));

        if let Some(recorder) = recorder {
            let monitor = self.clone();
            handles.push(tokio::spawn(diagnostics_task(
                monitor,
                recorder,
                config.poll_interval,
            )));
        }

        info!(
            interface = %config.interface,
            interval = ?config.poll_interval,
            smoothing = %config.smoothing,
            "monitor started"
        );
        Ok(())
    }

    /// Cancel background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let mut handles = self.inner.task_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        debug!("monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.cancel.is_cancelled()
    }

    // ── Event dispatch ───────────────────────────────────────────────

    /// Apply one transport event synchronously.
    pub fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::DeviceConnected(id) => {
                if self.inner.registry.on_connect(id) {
                    info!(datapath = %id, "datapath connected");
                }
            }
            TransportEvent::DeviceDisconnected(id) => {
                if self.inner.registry.on_disconnect(id) {
                    info!(datapath = %id, "datapath disconnected");
                }
            }
            TransportEvent::FlowStats { datapath, entries } => {
                self.inner.engine.on_flow_stats(datapath, &entries);
            }
            TransportEvent::PortStats { datapath, entries } => {
                self.inner.engine.on_port_stats(datapath, &entries);
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Utilization of `endpoint` (or of the link when `None`) together
    /// with a fresh queue sample.
    ///
    /// An endpoint that has never been observed reads as `0.0`.
    pub async fn utilization(&self, endpoint: Option<&MacAddress>) -> UtilizationReading {
        let utilization = match endpoint {
            Some(mac) => self
                .inner
                .engine
                .endpoint(mac)
                .map_or(Some(0.0), |e| e.utilization),
            None => self.inner.engine.link().utilization,
        };
        UtilizationReading {
            utilization,
            queue_length: self.sample_queue().await,
        }
    }

    /// Sample the monitored interface's backlog off the async runtime.
    pub async fn sample_queue(&self) -> QueueDepth {
        let sampler = Arc::clone(&self.inner.sampler);
        let interface = self.inner.config.interface.clone();
        match tokio::task::spawn_blocking(move || sampler.sample(&interface)).await {
            Ok(depth) => depth,
            Err(e) => {
                warn!(error = %e, "queue sampler task failed");
                QueueDepth::Unavailable
            }
        }
    }

    pub fn set_bottleneck_capacity(&self, bytes_per_sec: u64) -> Result<(), CoreError> {
        self.inner.engine.set_bottleneck_capacity(bytes_per_sec)
    }

    pub fn bottleneck_capacity(&self) -> Option<u64> {
        self.inner.engine.bottleneck_capacity()
    }

    pub fn link(&self) -> LinkUtilization {
        self.inner.engine.link()
    }

    /// Receives the link figures each time a port snapshot updates them.
    pub fn subscribe_link(&self) -> watch::Receiver<LinkUtilization> {
        self.inner.engine.subscribe_link()
    }

    pub fn endpoints(&self) -> Vec<EndpointUtilization> {
        self.inner.engine.endpoints()
    }

    pub fn connected_devices(&self) -> Arc<Vec<DatapathId>> {
        self.inner.registry.list_connected()
    }
}

// ── Background tasks ─────────────────────────────────────────────────

/// Dispatch transport events until cancelled or every sender is gone.
async fn event_pump_task(monitor: Monitor, mut rx: mpsc::UnboundedReceiver<TransportEvent>) {
    let cancel = monitor.inner.cancel.clone();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = rx.recv() => {
                let Some(event) = event else { break };
                monitor.handle_event(event);
            }
        }
    }
}

/// Append one diagnostics row per interval.
async fn diagnostics_task(monitor: Monitor, recorder: DiagnosticsRecorder, period: Duration) {
    let cancel = monitor.inner.cancel.clone();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let sample = DiagnosticsSample {
                    timestamp: Utc::now(),
                    link: monitor.link(),
                    queue: monitor.sample_queue().await,
                    endpoints: monitor.endpoints(),
                };
                if let Err(e) = recorder.record(&sample).await {
                    warn!(error = %e, "failed to write diagnostics");
                }
            }
        }
    }
}
