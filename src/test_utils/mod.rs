//! Helpers shared by the unit tests of this crate.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use crate::CfgEvent;

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    once_cell::sync::Lazy::force(&LOGGER_INIT);
}

/// Waits up to one second for the next event on `rx`.
pub async fn next_event(rx: &mut mpsc::Receiver<CfgEvent>) -> Option<CfgEvent> {
    timeout(Duration::from_secs(1), rx.recv()).await.ok().flatten()
}

/// Polls `check` every 10ms until it holds or two seconds elapse.
pub async fn eventually<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
