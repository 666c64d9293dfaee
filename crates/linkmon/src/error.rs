//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use linkmon_config::ConfigError;
use linkmon_core::{CoreError, TransportError};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const CONNECTION: i32 = 7;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Transport ────────────────────────────────────────────────────
    #[error("No switch transport available")]
    #[diagnostic(
        code(linkmon::no_transport),
        help(
            "linkmon does not speak the switch protocol itself.\n\
             Run with --simulate to drive it from the built-in fabric, or embed\n\
             linkmon-core with a Transport for your controller."
        )
    )]
    NoTransport,

    #[error("Switch transport failed: {message}")]
    #[diagnostic(code(linkmon::transport))]
    Transport { message: String },

    #[error("Could not listen on {addr}")]
    #[diagnostic(
        code(linkmon::bind_failed),
        help("Is another process using the port? Pick another with --listen.")
    )]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(linkmon::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration file not found: {path}")]
    #[diagnostic(
        code(linkmon::no_config),
        help("Create one with: linkmon config init --path {path}")
    )]
    NoConfig { path: String },

    #[error("Failed to load configuration: {message}")]
    #[diagnostic(
        code(linkmon::config),
        help("Check the file with: linkmon config show")
    )]
    Config { message: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("Monitor error: {message}")]
    #[diagnostic(code(linkmon::monitor))]
    Monitor { message: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to render TOML: {0}")]
    #[diagnostic(code(linkmon::toml))]
    Toml(#[from] toml::ser::Error),

    #[error("Failed to render JSON: {0}")]
    #[diagnostic(code(linkmon::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Validation { .. } | Self::NoTransport => exit_code::USAGE,
            Self::NoConfig { .. } | Self::Config { .. } => exit_code::CONFIG,
            Self::Bind { .. } | Self::Transport { .. } => exit_code::CONNECTION,
            _ => exit_code::GENERAL,
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::NotFound { path } => Self::NoConfig {
                path: path.display().to_string(),
            },
            ConfigError::Io(e) => Self::Io(e),
            ConfigError::Serialization(e) => Self::Toml(e),
            other @ ConfigError::Figment(_) => Self::Config {
                message: other.to_string(),
            },
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCapacity { value } => Self::Validation {
                field: "capacity".into(),
                reason: format!("must be a positive number of bytes/second, got {value}"),
            },
            CoreError::InvalidEndpoint { index } => Self::Validation {
                field: "endpoint".into(),
                reason: format!("{index} is outside 1..=255"),
            },
            CoreError::ValidationFailed { field, reason } => Self::Validation { field, reason },
            CoreError::Transport(e) => e.into(),
            CoreError::Io(e) => Self::Io(e),
            other @ (CoreError::AlreadyStarted | CoreError::ShutDown) => Self::Monitor {
                message: other.to_string(),
            },
        }
    }
}

impl From<TransportError> for CliError {
    fn from(err: TransportError) -> Self {
        Self::Transport {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_usage_errors() {
        let err: CliError = CoreError::InvalidCapacity { value: 0 }.into();
        assert_eq!(err.exit_code(), exit_code::USAGE);
    }

    #[test]
    fn missing_config_file_maps_to_config_exit() {
        let err: CliError = ConfigError::NotFound {
            path: "/nope.toml".into(),
        }
        .into();
        assert_eq!(err.exit_code(), exit_code::CONFIG);
        assert!(err.to_string().contains("/nope.toml"));
    }

    #[test]
    fn transport_errors_are_connection_errors() {
        let err: CliError = CoreError::Transport(TransportError::ChannelClosed).into();
        assert_eq!(err.exit_code(), exit_code::CONNECTION);
    }
}
