use std::sync::Arc;

use anyhow::Context;
use clubsync_observability::LogFormat;
use clubsync_offline::{CacheService, HttpProbe, HttpRemote, OfflineConfig, SyncWorker};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let format = match std::env::var("CLUBSYNC_LOG_FORMAT") {
        Ok(raw) => raw.parse::<LogFormat>().unwrap_or_default(),
        Err(_) => LogFormat::default(),
    };
    clubsync_observability::init_with(format);

    let config = OfflineConfig::from_env().context("invalid CLUBSYNC_* configuration")?;
    tracing::info!(api_url = %config.api_url, backend = ?config.store_backend, "starting clubsync agent");

    let remote = Arc::new(HttpRemote::from_config(&config));
    let probe = Arc::new(HttpProbe::new(&config.api_url));
    let service = Arc::new(CacheService::open(config, remote, probe).await);

    let worker = SyncWorker::new(service.clone());
    let handle = worker.handle();
    let task = worker.start();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!(status = ?service.status(), "shutting down");
    handle.shutdown();
    task.await.context("sync worker panicked")?;

    Ok(())
}
