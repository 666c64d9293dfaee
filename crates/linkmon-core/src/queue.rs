// ── Queue depth sampling ──
//
// Reads the outbound backlog of one interface by running the qdisc
// inspection command and scraping its statistics output. The child
// process is bounded by a timeout; every failure collapses into
// `QueueDepth::Unavailable`.

use std::fmt;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::{LazyLock, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::config::QueueSamplerConfig;

/// How often the sampler checks whether the child process has exited.
const CHILD_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// `backlog 345b` or `backlog 12kb`.
static BACKLOG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"backlog\s+(\d+)(k?)b").expect("backlog pattern is a valid regex")
});

/// Result of one queue sample.
///
/// Serializes as an integer byte count, with `-1` standing in for
/// [`Unavailable`](Self::Unavailable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueDepth {
    Bytes(u64),
    #[default]
    Unavailable,
}

impl QueueDepth {
    /// Wire representation: bytes, or `-1` when unavailable.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::Bytes(b) => i64::try_from(b).unwrap_or(i64::MAX),
            Self::Unavailable => -1,
        }
    }
}

impl fmt::Display for QueueDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bytes(b) => write!(f, "{}", bytesize::ByteSize(*b)),
            Self::Unavailable => f.write_str("unavailable"),
        }
    }
}

impl Serialize for QueueDepth {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

/// Anything that can report the backlog of a named interface.
///
/// `sample` may block (it typically waits on a child process); async
/// callers should go through `spawn_blocking`.
pub trait QueueSampler: Send + Sync + 'static {
    fn sample(&self, interface: &str) -> QueueDepth;
}

/// Extract the queue depth from qdisc statistics output.
///
/// The first backlog line belongs to the root qdisc; the second is the
/// shaping child that actually holds the queue, so that is the one
/// reported. Fewer than two occurrences means the layout is not the one
/// expected and the sample is unavailable.
pub fn parse_backlog(output: &str) -> QueueDepth {
    let Some(caps) = BACKLOG.captures_iter(output).nth(1) else {
        return QueueDepth::Unavailable;
    };
    let Some(value) = caps.get(1).and_then(|m| m.as_str().parse::<u64>().ok()) else {
        return QueueDepth::Unavailable;
    };
    let kilo = caps.get(2).is_some_and(|m| !m.as_str().is_empty());
    if kilo {
        value
            .checked_mul(1_000)
            .map_or(QueueDepth::Unavailable, QueueDepth::Bytes)
    } else {
        QueueDepth::Bytes(value)
    }
}

// ── Command-backed sampler ──────────────────────────────────────────

/// Samples by running `tc -s qdisc show dev <interface>` (or whatever
/// [`QueueSamplerConfig`] names) with a hard timeout.
#[derive(Debug, Clone)]
pub struct TcQueueSampler {
    config: QueueSamplerConfig,
}

impl TcQueueSampler {
    pub fn new(config: QueueSamplerConfig) -> Self {
        Self { config }
    }

    fn run(&self, interface: &str) -> Option<String> {
        let args = self.config.args_for(interface);
        let mut child = match Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.config.program, error = %e, "failed to spawn queue command");
                return None;
            }
        };

        // Drain stdout while waiting; a full pipe would otherwise stall
        // the child until the deadline.
        let (tx, rx) = mpsc::channel();
        if let Some(mut stdout) = child.stdout.take() {
            thread::spawn(move || {
                let mut out = String::new();
                let result = stdout.read_to_string(&mut out).map(|_| out);
                let _ = tx.send(result);
            });
        }

        let deadline = Instant::now() + self.config.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    warn!(
                        interface,
                        timeout = ?self.config.timeout,
                        "queue command timed out"
                    );
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                Ok(None) => thread::sleep(CHILD_POLL_INTERVAL),
                Err(e) => {
                    warn!(interface, error = %e, "failed to wait for queue command");
                    let _ = child.kill();
                    return None;
                }
            }
        };

        if !status.success() {
            debug!(interface, %status, "queue command exited unsuccessfully");
            return None;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(Ok(out)) => Some(out),
            Ok(Err(e)) => {
                warn!(interface, error = %e, "failed to read queue command output");
                None
            }
            Err(_) => {
                warn!(interface, "queue command output not closed before the deadline");
                None
            }
        }
    }
}

impl QueueSampler for TcQueueSampler {
    fn sample(&self, interface: &str) -> QueueDepth {
        let depth = self
            .run(interface)
            .map_or(QueueDepth::Unavailable, |out| parse_backlog(&out));
        debug!(interface, queue_length = %depth, "queue sample");
        depth
    }
}
