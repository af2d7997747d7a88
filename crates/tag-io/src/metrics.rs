//! Prometheus metrics for the tag engine.
//!
//! Sink adapters count their own traffic and failures; the runtime feeds the
//! scan counters from the loop's execution stats.

use prometheus::core::Collector;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::LazyLock;
use std::thread;
use tiny_http::{Header, Response, Server};

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

fn register<C: Collector + Clone + 'static>(collector: C) -> C {
    REGISTRY.register(Box::new(collector.clone())).unwrap();
    collector
}

// ============================================================================
// Sink Metrics
// ============================================================================

pub static TAG_WRITES: LazyLock<IntCounter> = LazyLock::new(|| {
    register(
        IntCounter::new(
            "tagengine_tag_writes_total",
            "Numeric and boolean tag values sent to the DAQ service",
        )
        .unwrap(),
    )
});

pub static STRING_TAG_WRITES: LazyLock<IntCounter> = LazyLock::new(|| {
    register(
        IntCounter::new(
            "tagengine_string_tag_writes_total",
            "String tag values sent to the DAQ service",
        )
        .unwrap(),
    )
});

pub static GATEWAY_UPDATES: LazyLock<IntCounter> = LazyLock::new(|| {
    register(
        IntCounter::new(
            "tagengine_gateway_updates_total",
            "Engine snapshots pushed to the supervisory gateway",
        )
        .unwrap(),
    )
});

/// Failed sink calls, labelled `persistence`, `gateway`, `notifier` or `auth`.
pub static SINK_FAILURES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register(
        IntCounterVec::new(
            Opts::new("tagengine_sink_failures_total", "Failed sink calls by sink"),
            &["sink"],
        )
        .unwrap(),
    )
});

pub static NOTIFICATIONS_PUBLISHED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register(
        IntCounterVec::new(
            Opts::new(
                "tagengine_notifications_published_total",
                "Notifications published to the hub by event",
            ),
            &["event"],
        )
        .unwrap(),
    )
});

// ============================================================================
// Bridge Metrics
// ============================================================================

pub static BRIDGE_CLIENTS: LazyLock<IntGauge> = LazyLock::new(|| {
    register(
        IntGauge::new(
            "tagengine_bridge_clients",
            "Subscribers currently connected to the notification bridge",
        )
        .unwrap(),
    )
});

pub static BRIDGE_AUTH_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register(
        IntCounter::new(
            "tagengine_bridge_auth_failures_total",
            "Subscriber hellos rejected for a missing or invalid token",
        )
        .unwrap(),
    )
});

// ============================================================================
// Scan Metrics
// ============================================================================

pub static SCAN_CYCLES_EXECUTED: LazyLock<IntCounter> = LazyLock::new(|| {
    register(
        IntCounter::new(
            "tagengine_scan_cycles_executed_total",
            "Scan cycles executed",
        )
        .unwrap(),
    )
});

pub static SCAN_CYCLES_MISSED: LazyLock<IntCounter> = LazyLock::new(|| {
    register(
        IntCounter::new(
            "tagengine_scan_cycles_missed_total",
            "Scan cycles started later than the overrun threshold",
        )
        .unwrap(),
    )
});

pub static BINDING_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    register(
        IntCounter::new(
            "tagengine_binding_failures_total",
            "Tag or group binding updates that failed",
        )
        .unwrap(),
    )
});

pub static SCAN_CYCLE_US: LazyLock<Histogram> = LazyLock::new(|| {
    register(
        Histogram::with_opts(
            HistogramOpts::new(
                "tagengine_scan_cycle_us",
                "Scan cycle duration in microseconds",
            )
            .buckets(vec![
                50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0, 25000.0, 100000.0,
            ]),
        )
        .unwrap(),
    )
});

// ============================================================================
// Metrics HTTP Server
// ============================================================================

fn encode() -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Serves `/metrics`, `/health` and `/ready` on `bind_addr` from a new thread.
pub fn serve_metrics(bind_addr: String) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let server = match Server::http(&bind_addr) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to start metrics server on {}: {}", bind_addr, e);
                return;
            }
        };

        tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

        for request in server.incoming_requests() {
            let response = match request.url() {
                "/metrics" => match encode() {
                    Ok(buffer) => {
                        let mut response = Response::from_data(buffer);
                        if let Ok(header) = Header::from_bytes(
                            &b"Content-Type"[..],
                            &b"text/plain; version=0.0.4"[..],
                        ) {
                            response = response.with_header(header);
                        }
                        response
                    }
                    Err(e) => {
                        tracing::warn!("Failed to encode metrics: {}", e);
                        Response::from_string("Internal Server Error")
                            .with_status_code(500)
                    }
                },
                "/health" => Response::from_string("OK"),
                "/ready" if SCAN_CYCLES_EXECUTED.get() > 0 => Response::from_string("Ready"),
                "/ready" => Response::from_string("Not Ready").with_status_code(503),
                _ => Response::from_string("Not Found").with_status_code(404),
            };
            let _ = request.respond(response);
        }
    })
}

/// Registers every metric so the first scrape lists them all.
pub fn init_metrics() {
    LazyLock::force(&TAG_WRITES);
    LazyLock::force(&STRING_TAG_WRITES);
    LazyLock::force(&GATEWAY_UPDATES);
    LazyLock::force(&SINK_FAILURES);
    LazyLock::force(&NOTIFICATIONS_PUBLISHED);
    LazyLock::force(&BRIDGE_CLIENTS);
    LazyLock::force(&BRIDGE_AUTH_FAILURES);
    LazyLock::force(&SCAN_CYCLES_EXECUTED);
    LazyLock::force(&SCAN_CYCLES_MISSED);
    LazyLock::force(&BINDING_FAILURES);
    LazyLock::force(&SCAN_CYCLE_US);
}
