//! Entry point for `dtest-master`: the HTTP front door slaves reserve work
//! from and clients submit jobs through.

use std::sync::Arc;

use dist_test::adapters::blob::{FsBlobStore, S3BlobStore};
use dist_test::adapters::sqlite::{all_embedded_migrations, create_pool, Migrator, SqliteResultsStore};
use dist_test::adapters::RedisTaskQueue;
use dist_test::domain::models::config::BlobStoreKind;
use dist_test::domain::ports::{BlobStorePort, ResultsStorePort, TaskQueuePort};
use dist_test::infrastructure::config::ConfigLoader;
use dist_test::infrastructure::logging::LoggerImpl;
use dist_test::master::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::load()?;
    let _logger = LoggerImpl::init(&config.logging)?;

    let pool = create_pool(&config.database.url, None).await?;
    Migrator::new(pool.clone()).run_embedded_migrations(all_embedded_migrations()).await?;
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

    let router = build_router(&config.master, results_store, task_queue, blob_store);
    let listener = tokio::net::TcpListener::bind(&config.master.bind_addr).await?;
    tracing::info!(addr = %config.master.bind_addr, "master listening");
    axum::serve(listener, router).await?;
    Ok(())
}
