//! `linkmon serve`: run the collector and the HTTP API until Ctrl-C.

use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use linkmon_config::Config;
use linkmon_core::{Monitor, MonitorConfig, SimEndpoint, SimFabric, SimLayout};

use crate::api;
use crate::cli::{GlobalOpts, ServeArgs};
use crate::error::CliError;

/// Simulated bottleneck rate when no capacity is configured.
const SIM_DEFAULT_CAPACITY_BPS: u64 = 490_000;

pub async fn handle(args: ServeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let mut cfg = super::load(global)?;
    let mut config = resolve(&mut cfg, &args)?;
    let listen = match args.listen {
        Some(addr) => addr,
        None => cfg.listen_addr()?,
    };

    if !args.simulate {
        return Err(CliError::NoTransport);
    }

    let capacity = config
        .bottleneck_capacity_bps
        .unwrap_or(SIM_DEFAULT_CAPACITY_BPS);
    let layout = SimLayout::reference(capacity);
    let fabric = Arc::new(SimFabric::new(layout.clone(), sim_endpoints(&args.sim_rates)?));
    adopt_simulated_topology(&mut config, &layout);
    config.bottleneck_capacity_bps = Some(capacity);

    let monitor = start_simulated(config, &fabric).await?;
    info!(
        endpoints = args.sim_rates.len(),
        capacity,
        "simulated fabric attached"
    );

    let listener = TcpListener::bind(listen)
        .await
        .map_err(|source| CliError::Bind {
            addr: listen.to_string(),
            source,
        })?;
    info!(addr = %listen, "HTTP API listening");

    let served = axum::serve(listener, api::router(monitor.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await;

    monitor.shutdown().await;
    served?;
    Ok(())
}

/// Apply the flags and translate the result into the collector's config.
fn resolve(cfg: &mut Config, args: &ServeArgs) -> Result<MonitorConfig, CliError> {
    apply_overrides(cfg, args);
    let mut config = cfg.to_monitor_config()?;
    if let Some(smoothing) = args.smoothing {
        config.smoothing = smoothing;
    }
    Ok(config)
}

/// Fold command-line flags into the loaded configuration.
fn apply_overrides(cfg: &mut Config, args: &ServeArgs) {
    if let Some(interface) = &args.interface {
        cfg.monitor.interface.clone_from(interface);
    }
    if let Some(interval) = args.poll_interval {
        cfg.monitor.poll_interval = humantime::format_duration(interval).to_string();
    }
    if let Some(capacity) = args.capacity {
        cfg.monitor.bottleneck_capacity_bps = Some(capacity);
    }
    if let Some(dir) = &args.diagnostics_dir {
        cfg.diagnostics.enabled = true;
        cfg.diagnostics.directory = Some(dir.clone());
    }
}

/// Point the measurement taps at the simulated switches. Returns whether a
/// configured `[topology]` had to be replaced.
fn adopt_simulated_topology(config: &mut MonitorConfig, layout: &SimLayout) -> bool {
    let simulated = layout.topology();
    if config.topology == simulated {
        return false;
    }
    warn!(
        configured = ?config.topology,
        simulated = ?simulated,
        "configured [topology] does not match the simulated fabric; using the simulated taps"
    );
    config.topology = simulated;
    true
}

fn sim_endpoints(rates: &[u64]) -> Result<Vec<SimEndpoint>, CliError> {
    rates
        .iter()
        .zip(1..)
        .map(|(&rate, index)| {
            SimEndpoint::numbered(index, rate).ok_or_else(|| CliError::Validation {
                field: "sim-rates".into(),
                reason: "at most 255 simulated endpoints are supported".into(),
            })
        })
        .collect()
}

async fn start_simulated(
    config: MonitorConfig,
    fabric: &Arc<SimFabric>,
) -> Result<Monitor, CliError> {
    let monitor = Monitor::new(config, fabric.clone())?;
    fabric.attach(monitor.event_sender());
    fabric.connect_all()?;
    monitor.start(fabric.clone()).await?;
    Ok(monitor)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
