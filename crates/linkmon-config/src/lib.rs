//! Configuration for the linkmon collector.
//!
//! TOML file layering (defaults, platform config file, explicit file,
//! environment) and translation to `linkmon_core::MonitorConfig`. The
//! binary adds flag-aware overrides on top.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use linkmon_core::config::INTERFACE_PLACEHOLDER;
use linkmon_core::{
    CoreError, DatapathId, DiagnosticsConfig, LinkTap, MonitorConfig, QueueSamplerConfig,
    Smoothing, Topology,
};

/// Prefix of environment overrides; nested keys are separated by `__`,
/// e.g. `LINKMON_MONITOR__BOTTLENECK_CAPACITY_BPS`.
pub const ENV_PREFIX: &str = "LINKMON_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("config file not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<CoreError> for ConfigError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ValidationFailed { field, reason } => Self::Validation { field, reason },
            other => Self::Validation {
                field: "monitor".into(),
                reason: other.to_string(),
            },
        }
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub monitor: MonitorSection,

    #[serde(default)]
    pub topology: TopologySection,

    #[serde(default)]
    pub queue: QueueSection,

    #[serde(default)]
    pub diagnostics: DiagnosticsSection,

    #[serde(default)]
    pub http: HttpSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Interface whose qdisc backlog is reported as the queue length.
    pub interface: String,

    /// Humantime duration, e.g. "500ms" or "1s".
    pub poll_interval: String,

    /// "raw" or "ewma".
    pub smoothing: String,

    pub calibration_factor: f64,

    /// Bottleneck capacity in bytes/second. Unset until configured or
    /// set through the HTTP API.
    pub bottleneck_capacity_bps: Option<u64>,
}

impl Default for MonitorSection {
    fn default() -> Self {
        let core = MonitorConfig::default();
        Self {
            interface: core.interface,
            poll_interval: humantime::format_duration(core.poll_interval).to_string(),
            smoothing: core.smoothing.to_string(),
            calibration_factor: core.calibration_factor,
            bottleneck_capacity_bps: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TopologySection {
    /// Flow priority of measured (user) traffic.
    pub user_priority: u16,

    pub endpoint_taps: Vec<EndpointTap>,

    pub link_tap: Option<LinkTapSection>,
}

impl Default for TopologySection {
    fn default() -> Self {
        let reference = Topology::reference();
        Self {
            user_priority: reference.user_priority,
            endpoint_taps: reference
                .endpoint_taps
                .iter()
                .map(|(dp, port)| EndpointTap {
                    datapath: dp.as_u64(),
                    egress_port: *port,
                })
                .collect(),
            link_tap: reference.link_tap.map(|t| LinkTapSection {
                datapath: t.datapath.as_u64(),
                ingress_port: t.ingress_port,
            }),
        }
    }
}

/// Access switch whose flows towards `egress_port` are measured per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct EndpointTap {
    pub datapath: u64,
    pub egress_port: u32,
}

/// Switch port whose rx counter measures the whole link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct LinkTapSection {
    pub datapath: u64,
    pub ingress_port: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueSection {
    pub program: String,

    /// `{interface}` is replaced with the monitored interface name.
    pub args: Vec<String>,

    /// Humantime duration bounding one invocation.
    pub timeout: String,
}

impl Default for QueueSection {
    fn default() -> Self {
        let core = QueueSamplerConfig::default();
        Self {
            program: core.program,
            args: core.args,
            timeout: humantime::format_duration(core.timeout).to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsSection {
    pub enabled: bool,

    /// Defaults to `<data dir>/diagnostics`.
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HttpSection {
    pub listen: String,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".into(),
        }
    }
}

// ── Translation ─────────────────────────────────────────────────────

impl Config {
    /// Build and validate the runtime monitor configuration.
    pub fn to_monitor_config(&self) -> Result<MonitorConfig, ConfigError> {
        let monitor = &self.monitor;
        let smoothing: Smoothing =
            monitor
                .smoothing
                .parse()
                .map_err(|_| ConfigError::Validation {
                    field: "monitor.smoothing".into(),
                    reason: format!("expected 'raw' or 'ewma', got '{}'", monitor.smoothing),
                })?;

        let mut endpoint_taps = BTreeMap::new();
        for tap in &self.topology.endpoint_taps {
            let datapath = DatapathId::new(tap.datapath);
            if endpoint_taps.insert(datapath, tap.egress_port).is_some() {
                return Err(ConfigError::Validation {
                    field: "topology.endpoint_taps".into(),
                    reason: format!("datapath {datapath} listed more than once"),
                });
            }
        }

        let diagnostics = self
            .diagnostics
            .enabled
            .then(|| DiagnosticsConfig {
                directory: self
                    .diagnostics
                    .directory
                    .clone()
                    .unwrap_or_else(default_diagnostics_dir),
            });

        let config = MonitorConfig {
            interface: monitor.interface.clone(),
            poll_interval: parse_duration("monitor.poll_interval", &monitor.poll_interval)?,
            smoothing,
            calibration_factor: monitor.calibration_factor,
            bottleneck_capacity_bps: monitor.bottleneck_capacity_bps,
            topology: Topology {
                user_priority: self.topology.user_priority,
                endpoint_taps,
                link_tap: self.topology.link_tap.map(|t| LinkTap {
                    datapath: DatapathId::new(t.datapath),
                    ingress_port: t.ingress_port,
                }),
            },
            queue: QueueSamplerConfig {
                program: self.queue.program.clone(),
                args: self.queue.args.clone(),
                timeout: parse_duration("queue.timeout", &self.queue.timeout)?,
            },
            diagnostics,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parsed HTTP listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http.listen.parse().map_err(|_| ConfigError::Validation {
            field: "http.listen".into(),
            reason: format!("expected host:port, got '{}'", self.http.listen),
        })
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(raw).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{raw}': {e}"),
    })
}

// ── Paths ───────────────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || fallback_dir().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn default_diagnostics_dir() -> PathBuf {
    project_dirs().map_or_else(
        || fallback_dir().join("diagnostics"),
        |dirs| dirs.data_dir().join("diagnostics"),
    )
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "linkmon", "linkmon")
}

fn fallback_dir() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("linkmon");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config: defaults, the platform config file (if any),
/// `explicit` (which must exist), then `LINKMON_*` environment variables.
pub fn load_config(explicit: Option<&Path>) -> Result<Config, ConfigError> {
    layered(&config_path(), explicit)?.extract().map_err(Into::into)
}

fn layered(platform: &Path, explicit: Option<&Path>) -> Result<Figment, ConfigError> {
    let mut figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(platform));

    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        figment = figment.merge(Toml::file(path));
    }

    Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`, creating parent
/// directories as needed. Refuses to overwrite an existing file unless
/// `force` is set.
pub fn save_config(cfg: &Config, path: &Path, force: bool) -> Result<(), ConfigError> {
    let toml_str = toml::to_string_pretty(cfg)?;
    write_new(path, &toml_str, force)
}

/// Annotated default configuration written by `linkmon config init`.
pub fn default_config_template() -> String {
    format!(
        r#"# linkmon configuration
#
# Every key is optional; missing keys take the defaults shown here.
# Environment variables override the file, e.g.
#   LINKMON_MONITOR__BOTTLENECK_CAPACITY_BPS=490000

[monitor]
# Interface whose qdisc backlog is reported as the queue length.
interface = "r1-eth2"
poll_interval = "500ms"
# "raw" differences rx_bytes directly; "ewma" smooths the counter first.
smoothing = "raw"
# Per-endpoint utilization is divided by this factor (0, 1].
calibration_factor = 0.9
# Bottleneck capacity in bytes/second. Leave unset to report utilization
# as unavailable until it is set through the HTTP API.
# bottleneck_capacity_bps = 490000

[topology]
# Only flows at this priority are measured.
user_priority = 1

# Access switches: flows leaving through `egress_port` count per endpoint.
[[topology.endpoint_taps]]
datapath = 1
egress_port = 3

# Aggregation switch port whose rx bytes measure the whole link.
[topology.link_tap]
datapath = 2
ingress_port = 2

[queue]
program = "tc"
args = ["-s", "qdisc", "show", "dev", "{placeholder}"]
timeout = "2s"

[diagnostics]
enabled = false
# directory = "/var/log/linkmon"

[http]
listen = "0.0.0.0:8080"
"#,
        placeholder = INTERFACE_PLACEHOLDER
    )
}

/// Write [`default_config_template`] to `path`. Refuses to overwrite an
/// existing file unless `force` is set.
pub fn write_default_config(path: &Path, force: bool) -> Result<(), ConfigError> {
    write_new(path, &default_config_template(), force)
}

fn write_new(path: &Path, contents: &str, force: bool) -> Result<(), ConfigError> {
    if path.exists() && !force {
        return Err(ConfigError::Validation {
            field: "path".into(),
            reason: format!("{} already exists (use --force to overwrite)", path.display()),
        });
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, contents)?;
    Ok(())
}
