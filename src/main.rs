use std::sync::Arc;

use cfg_sync::metrics;
use cfg_sync::Error;
use cfg_sync::LogConfig;
use cfg_sync::MemMetaStore;
use cfg_sync::Result;
use cfg_sync::Settings;
use cfg_sync::StoreBackedCfg;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let settings = Settings::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&settings.log)?;

    // Initializing Shutdown Signal
    let (graceful_tx, graceful_rx) = watch::channel(());

    if settings.monitoring.prometheus_enabled {
        let port = settings.monitoring.prometheus_port;
        let rx = graceful_rx.clone();
        tokio::spawn(async move {
            metrics::start_server(port, rx).await;
        });
    }

    // In-process store; a deployment embedding this crate passes its own MetaStore
    let store = Arc::new(MemMetaStore::new());
    let cfg = StoreBackedCfg::new(store, &settings);
    let loaded = cfg.load().await?;
    cfg.start();
    info!(loaded, prefix = cfg.prefix(), "cfg-sync started. Waiting for CTRL+C signal...");

    if let Err(e) = graceful_shutdown(graceful_tx).await {
        error!("Failed to shutdown: {:?}", e);
    }

    cfg.shutdown().await;
    println!("Exiting program.");
    Ok(())
}

async fn graceful_shutdown(graceful_tx: watch::Sender<()>) -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }

    graceful_tx.send(()).map_err(|e| {
        error!("Failed to send shutdown signal: {}", e);
        Error::Fatal(format!("Failed to send shutdown signal: {}", e))
    })?;

    info!("Shutdown completed");
    Ok(())
}

pub fn init_observability(log: &LogConfig) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&log.log_dir)?;
    let file_appender = tracing_appender::rolling::daily(&log.log_dir, &log.file_prefix);

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
