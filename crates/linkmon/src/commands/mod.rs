//! Subcommand handlers.

pub mod config_cmd;
pub mod sample_queue;
pub mod serve;

use linkmon_config::Config;

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// Resolve the layered configuration for this invocation.
pub(crate) fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(linkmon_config::load_config(global.config.as_deref())?)
}
