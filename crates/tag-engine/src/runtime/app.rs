use crate::plant::{self, PlantError, TankParams, TankTask};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::logging::init_tracing;
use crate::runtime::telemetry;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tag_core::{MemoryTagStore, ScanConfig, ScanLoop, SinkError, StoreError, SyncFanout};
use tag_io::auth::AuthConfig;
use tag_io::bridge::{run_bridge, BridgeConfig};
use tag_io::{DaqClient, NotificationHub};
use thiserror::Error;
use tracing::{error, info, warn};

const SUPERVISE_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Error)]
pub enum AppError {
    #[error("sink setup failed: {0}")]
    Sink(#[from] SinkError),

    #[error("tag store setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("plant setup failed: {0}")]
    Plant(#[from] PlantError),

    #[error("bridge failed: {0}")]
    Bridge(#[from] std::io::Error),

    #[error("{0} thread panicked")]
    Panicked(&'static str),
}

pub fn run_from_args() -> ExitCode {
    let config = RuntimeConfig::from_env();
    if config.show_help {
        RuntimeConfig::print_help();
        return ExitCode::SUCCESS;
    }
    init_tracing(config.json_logs);
    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "tag engine stopped");
            ExitCode::FAILURE
        }
    }
}

pub fn run(config: RuntimeConfig) -> Result<(), AppError> {
    telemetry::init();
    let _metrics_handle = telemetry::start_metrics_server(&config.metrics_addr);

    let store = Arc::new(MemoryTagStore::new());
    plant::provision(&store)?;

    let hub = NotificationHub::new();
    let daq = Arc::new(DaqClient::from_endpoints(
        &config.services,
        config.http_timeout,
    )?);
    info!(
        daq = daq.base_url(),
        app_auth = config.services.app_auth,
        gateway_policy = ?config.gateway_policy,
        "DAQ sinks configured"
    );
    let fanout = Arc::new(
        SyncFanout::new(daq.clone(), Arc::new(hub.clone()), daq).with_policy(config.gateway_policy),
    );

    let tank = TankTask::new(Arc::clone(&store), Some(fanout), TankParams::default())?;
    let stop = Arc::new(AtomicBool::new(false));

    let scan_config = ScanConfig {
        cycle_time: config.cycle_time,
        ..Default::default()
    };
    info!(
        cycle_time_ms = scan_config.cycle_time.as_millis() as u64,
        "Starting scan loop"
    );
    let scan_handle = {
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut scan = ScanLoop::new(scan_config);
            scan.add_task(tank);
            scan.observe_cycles(telemetry::scan_observer());
            scan.run(&stop);
            scan.stats().clone()
        })
    };

    let bridge_handle = if config.bridge_enabled {
        let bridge_config = build_bridge_config(&config);
        info!(addr = %bridge_config.bind_addr, "Starting bridge");
        let stop = Arc::clone(&stop);
        let hub = hub.clone();
        Some(thread::spawn(move || run_bridge(hub, bridge_config, stop)))
    } else {
        info!("Bridge disabled");
        None
    };

    info!("Tag engine running");

    let deadline = config
        .run_seconds
        .map(|seconds| Instant::now() + Duration::from_secs(seconds));
    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Run duration elapsed");
            break;
        }
        if bridge_handle.as_ref().is_some_and(|h| h.is_finished()) {
            warn!("Bridge exited, shutting down");
            break;
        }
        if scan_handle.is_finished() {
            warn!("Scan loop exited, shutting down");
            break;
        }
        thread::sleep(SUPERVISE_INTERVAL);
    }
    stop.store(true, Ordering::Relaxed);

    let stats = scan_handle
        .join()
        .map_err(|_| AppError::Panicked("scan"))?;
    info!(
        cycles_executed = stats.cycles_executed,
        cycles_missed = stats.cycles_missed,
        binding_failures = stats.binding_failures,
        max_cycle_us = stats.max_cycle_us,
        "Run complete"
    );

    if let Some(handle) = bridge_handle {
        handle.join().map_err(|_| AppError::Panicked("bridge"))??;
    }
    Ok(())
}

fn build_bridge_config(config: &RuntimeConfig) -> BridgeConfig {
    BridgeConfig {
        bind_addr: config.bind_addr.clone(),
        auth: AuthConfig {
            enabled: config.bridge_secret.is_some(),
            secret: config.bridge_secret.clone().unwrap_or_default().into_bytes(),
            max_age_secs: config.token_max_age_secs,
        },
        require_hello: config.require_hello,
        ..Default::default()
    }
}
