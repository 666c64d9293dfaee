// ── Diagnostics recorder ──
//
// Append-only line logs for offline analysis. Two files live in the
// configured directory:
//
//   link.log       <timestamp> <link_rate_bps> <queue_bytes> <first_endpoint_utilization>
//   endpoints.log  <timestamp> <endpoint_count> [<mac> <rate_bps> <utilization>]...
//
// Values that are unavailable are written as `-1` (queue) or `NaN`
// (utilization). Nothing here is ever read back.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::DiagnosticsConfig;
use crate::error::CoreError;
use crate::model::{EndpointUtilization, LinkUtilization};
use crate::queue::QueueDepth;

pub const LINK_LOG: &str = "link.log";
pub const ENDPOINT_LOG: &str = "endpoints.log";

/// One row's worth of engine state, captured at a single instant.
#[derive(Debug, Clone)]
pub struct DiagnosticsSample {
    pub timestamp: DateTime<Utc>,
    pub link: LinkUtilization,
    pub queue: QueueDepth,
    pub endpoints: Vec<EndpointUtilization>,
}

impl DiagnosticsSample {
    pub fn link_line(&self) -> String {
        let first = self
            .endpoints
            .first()
            .and_then(|e| e.utilization)
            .unwrap_or(f64::NAN);
        format!(
            "{} {:.1} {} {:.6}\n",
            stamp(self.timestamp),
            self.link.sending_rate_bps,
            self.queue.as_i64(),
            first,
        )
    }

    pub fn endpoint_line(&self) -> String {
        let mut line = format!("{} {}", stamp(self.timestamp), self.endpoints.len());
        for ep in &self.endpoints {
            let _ = write!(
                line,
                " {} {:.1} {:.6}",
                ep.mac,
                ep.sending_rate_bps,
                ep.utilization.unwrap_or(f64::NAN)
            );
        }
        line.push('\n');
        line
    }
}

/// Appends [`DiagnosticsSample`]s to the two log files.
#[derive(Debug, Clone)]
pub struct DiagnosticsRecorder {
    link_path: PathBuf,
    endpoint_path: PathBuf,
}

impl DiagnosticsRecorder {
    /// Create the log directory if needed.
    pub async fn open(config: &DiagnosticsConfig) -> Result<Self, CoreError> {
        fs::create_dir_all(&config.directory).await?;
        debug!(directory = %config.directory.display(), "diagnostics logs enabled");
        Ok(Self {
            link_path: config.directory.join(LINK_LOG),
            endpoint_path: config.directory.join(ENDPOINT_LOG),
        })
    }

    pub async fn record(&self, sample: &DiagnosticsSample) -> Result<(), CoreError> {
        append(&self.link_path, &sample.link_line()).await?;
        append(&self.endpoint_path, &sample.endpoint_line()).await?;
        Ok(())
    }
}

async fn append(path: &Path, line: &str) -> Result<(), CoreError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

fn stamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::MacAddress;

    fn sample() -> DiagnosticsSample {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let ep = |n: u32, util: Option<f64>| EndpointUtilization {
            mac: MacAddress::from_endpoint_index(n).unwrap(),
            utilization: util,
            sending_rate_bps: 392_000.0,
            increment_bytes: 24_500,
            active_endpoints: 2,
            updated_at: ts,
        };
        DiagnosticsSample {
            timestamp: ts,
            link: LinkUtilization {
                utilization: Some(0.2),
                sending_rate_bps: 784_000.0,
                increment_bytes: 49_000.0,
                updated_at: Some(ts),
            },
            queue: QueueDepth::Bytes(345),
            endpoints: vec![ep(1, Some(0.25)), ep(2, None)],
        }
    }

    #[test]
    fn link_line_layout() {
        assert_eq!(
            sample().link_line(),
            "2024-03-01T12:00:00.000Z 784000.0 345 0.250000\n"
        );
    }

    #[test]
    fn endpoint_line_lists_every_endpoint() {
        assert_eq!(
            sample().endpoint_line(),
            "2024-03-01T12:00:00.000Z 2 00:00:00:00:00:01 392000.0 0.250000 \
             00:00:00:00:00:02 392000.0 NaN\n"
        );
    }

    #[test]
    fn unavailable_queue_is_minus_one() {
        let mut s = sample();
        s.queue = QueueDepth::Unavailable;
        s.endpoints.clear();
        assert_eq!(s.link_line(), "2024-03-01T12:00:00.000Z 784000.0 -1 NaN\n");
    }

    #[tokio::test]
    async fn record_appends_to_both_logs() {
        let dir = tempfile::tempdir().unwrap();
        let config = DiagnosticsConfig {
            directory: dir.path().join("diag"),
        };
        let recorder = DiagnosticsRecorder::open(&config).await.unwrap();
        recorder.record(&sample()).await.unwrap();
        recorder.record(&sample()).await.unwrap();

        let link = std::fs::read_to_string(config.directory.join(LINK_LOG)).unwrap();
        let endpoints = std::fs::read_to_string(config.directory.join(ENDPOINT_LOG)).unwrap();
        assert_eq!(link.lines().count(), 2);
        assert_eq!(endpoints.lines().count(), 2);
    }
}
