use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

#[cfg(test)]
mod metrics_test;

lazy_static! {
    pub static ref CAS_MISMATCH_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cfg_cas_mismatch_total", "Writes rejected by a CAS or revision precondition"),
        &["op", "source"]
    )
    .expect("metric can not be created");

    pub static ref WATCH_RESTART_TOTAL: IntCounter = IntCounter::new(
        "cfg_watch_restart_total",
        "Watch streams restarted after a failure"
    )
    .expect("metric can not be created");

    pub static ref REMOTE_CHANGE_APPLIED_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("cfg_remote_change_applied_total", "Remote changes fed into the cache"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref NOTIFICATION_DROPPED_TOTAL: IntCounter = IntCounter::new(
        "cfg_notification_dropped_total",
        "Change events dropped because a subscriber buffer was full"
    )
    .expect("metric can not be created");

    pub static ref ASYNC_ERROR_TOTAL: IntCounter = IntCounter::new(
        "cfg_async_error_total",
        "Errors reported through on_error"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(CAS_MISMATCH_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WATCH_RESTART_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(REMOTE_CHANGE_APPLIED_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(NOTIFICATION_DROPPED_TOTAL.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(ASYNC_ERROR_TOTAL.clone()))
        .expect("collector can be registered");
}

/// Serves `/metrics` until `shutdown_signal` fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let (_, server) =
        warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
            let _ = shutdown_signal.changed().await;
        });
    server.await;
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(encode_metrics())
}

/// Text exposition of the crate registry.
pub fn encode_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    match String::from_utf8(buffer) {
        Ok(v) => v,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
