//! Prometheus metrics, served over `warp` at `/metrics`, in the shape this
//! daemon family always uses: a process-wide `Registry` behind `lazy_static`,
//! a handful of named collectors, and a plain-text encode-and-serve handler.

use std::net::IpAddr;

use prometheus::{Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};
use tokio_util::sync::CancellationToken;
use tracing::info;
use warp::Filter;

lazy_static::lazy_static! {
    static ref REGISTRY: Registry = Registry::new();

    pub static ref SESSIONS_STARTED: IntCounterVec = IntCounterVec::new(
        Opts::new("sessions_started_total", "Sessions started, by source chain"),
        &["source_chain"],
    ).expect("metric can be created");

    pub static ref SESSIONS_COMPLETED: IntCounterVec = IntCounterVec::new(
        Opts::new("sessions_completed_total", "Sessions reaching a terminal status"),
        &["status"],
    ).expect("metric can be created");

    pub static ref PRESIGNS_AVAILABLE: IntGauge = IntGauge::new(
        "presigns_available", "Presigns currently available for lease",
    ).expect("metric can be created");

    pub static ref SIGNING_DURATION_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("signing_duration_seconds", "Time from lease to complete_seal"),
    ).expect("metric can be created");
}

pub fn register_metrics() {
    REGISTRY.register(Box::new(SESSIONS_STARTED.clone())).expect("metric registers");
    REGISTRY.register(Box::new(SESSIONS_COMPLETED.clone())).expect("metric registers");
    REGISTRY.register(Box::new(PRESIGNS_AVAILABLE.clone())).expect("metric registers");
    REGISTRY.register(Box::new(SIGNING_DURATION_SECONDS.clone())).expect("metric registers");
}

#[tracing::instrument(name = "metrics-server", skip_all)]
pub async fn start(hostname: &str, port: u16, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(hostname, port, "starting metrics server");

    let route = warp::path("metrics")
        .and(warp::path::end())
        .map(|| warp::reply::with_header(metrics_text(), "content-type", "text/plain; version=0.0.4"));

    let (_, future) = warp::serve(route)
        .bind_with_graceful_shutdown((hostname.parse::<IpAddr>()?, port), async move {
            shutdown.cancelled().await;
        });

    future.await;
    Ok(())
}

fn metrics_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(error) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        tracing::error!(%error, "could not encode metrics");
    }
    String::from_utf8(buffer).unwrap_or_default()
}
