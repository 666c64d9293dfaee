//! One-shot queue sampling.

use serde_json::json;

use linkmon_core::{QueueSampler, TcQueueSampler};

use crate::cli::{GlobalOpts, SampleQueueArgs};
use crate::error::CliError;

pub async fn handle(args: SampleQueueArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = super::load(global)?;
    let monitor = cfg.to_monitor_config()?;
    let interface = args.interface.unwrap_or(monitor.interface);

    let sampler = TcQueueSampler::new(monitor.queue);
    let iface = interface.clone();
    let depth = tokio::task::spawn_blocking(move || sampler.sample(&iface))
        .await
        .map_err(|e| CliError::Monitor {
            message: format!("queue sampler task failed: {e}"),
        })?;

    if args.json {
        let body = json!({ "interface": interface, "queue_length": depth });
        println!("{}", serde_json::to_string(&body)?);
    } else {
        println!("{}", depth.as_i64());
    }
    Ok(())
}
