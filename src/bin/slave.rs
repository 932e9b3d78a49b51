//! Entry point for `dtest-slave`: reserves one task at a time from the
//! master's queue, runs it under `run_isolated.py`, and reports the result.

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};

use dist_test::adapters::blob::{FsBlobStore, S3BlobStore};
use dist_test::adapters::sqlite::{create_pool, SqliteResultsStore};
use dist_test::adapters::RedisTaskQueue;
use dist_test::domain::models::config::BlobStoreKind;
use dist_test::domain::ports::{BlobStorePort, ResultsStorePort, TaskQueuePort};
use dist_test::infrastructure::config::ConfigLoader;
use dist_test::infrastructure::logging::LoggerImpl;
use dist_test::slave::Slave;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load()?;
    let _logger = LoggerImpl::init(&config.logging)?;

    let pool = create_pool(&config.database.url, None).await?;
    let results_store: Arc<dyn ResultsStorePort> = Arc::new(SqliteResultsStore::new(pool));

    let task_queue: Arc<dyn TaskQueuePort> =
        Arc::new(RedisTaskQueue::connect(&config.queue.redis_url, config.queue.reservation_ttl_secs).await?);

    let blob_store: Arc<dyn BlobStorePort> = match config.blob_store.kind {
        BlobStoreKind::S3 => {
            let bucket = config.blob_store.s3_bucket.clone().expect("validated by ConfigLoader::validate");
            Arc::new(S3BlobStore::new(bucket).await)
        }
        BlobStoreKind::Filesystem => Arc::new(FsBlobStore::new(config.blob_store.fs_root.clone())),
    };

    let mut slave = Slave::new(config.slave, task_queue, results_store, blob_store).await?;
    slave.spawn_healthz();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        sigterm.recv().await;
        tracing::warn!("received SIGTERM, finishing current task before exit");
        let _ = shutdown_tx.send(true);
    });

    slave.run(shutdown_rx).await;
    Ok(())
}
