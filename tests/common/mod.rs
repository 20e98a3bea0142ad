use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cfg_sync::MemMetaStore;
use cfg_sync::Settings;
use cfg_sync::StoreBackedCfg;

pub const WAIT_FOR_CONVERGENCE: Duration = Duration::from_secs(3);

static LOGGER_INIT: once_cell::sync::Lazy<()> = once_cell::sync::Lazy::new(|| {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
});

pub fn enable_logger() {
    once_cell::sync::Lazy::force(&LOGGER_INIT);
}

pub fn test_settings(prefix: &str) -> Settings {
    let mut settings = Settings::default();
    settings.cfg.prefix = prefix.to_string();
    settings.retry.watch.base_delay_ms = 5;
    settings.retry.watch.max_delay_ms = 50;
    settings.validate().expect("valid test settings")
}

/// Starts a node-local cfg replica over the shared store.
pub async fn start_replica(
    store: &Arc<MemMetaStore>,
    prefix: &str,
) -> StoreBackedCfg<MemMetaStore> {
    let cfg = StoreBackedCfg::new(store.clone(), &test_settings(prefix));
    cfg.load().await.expect("load from store");
    cfg.start();
    cfg
}

pub async fn wait_until<F, Fut>(check: F) -> bool
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + WAIT_FOR_CONVERGENCE;
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
