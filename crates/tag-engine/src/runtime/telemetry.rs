use std::thread;
use tag_core::ExecutionStats;
use tag_io::metrics::{
    init_metrics, serve_metrics, BINDING_FAILURES, SCAN_CYCLES_EXECUTED, SCAN_CYCLES_MISSED,
    SCAN_CYCLE_US,
};
use tracing::info;

pub fn init() {
    init_metrics();
}

pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    addr.as_ref().map(|addr| {
        info!(addr = %addr, "Starting metrics server");
        serve_metrics(addr.clone())
    })
}

/// Cycle observer that forwards scan statistics to the Prometheus counters.
pub fn scan_observer() -> impl FnMut(&ExecutionStats) + Send + 'static {
    let mut last = ExecutionStats::default();
    move |stats| {
        SCAN_CYCLES_EXECUTED.inc_by(stats.cycles_executed.saturating_sub(last.cycles_executed));
        SCAN_CYCLES_MISSED.inc_by(stats.cycles_missed.saturating_sub(last.cycles_missed));
        BINDING_FAILURES.inc_by(stats.binding_failures.saturating_sub(last.binding_failures));
        SCAN_CYCLE_US.observe(stats.last_cycle_us as f64);
        last = stats.clone();
    }
}
