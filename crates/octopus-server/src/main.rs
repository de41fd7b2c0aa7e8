use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use octopus_server::{
    db,
    processing::{
        convert_wexbim::ConvertWexBimHandler,
        converter::{ExternalCommandConverter, WexBimConverter},
        extract_properties::ExtractPropertiesHandler,
        progress::{ProgressBus, ProgressNotifier},
        queue::{JobQueue, SqliteJobQueue},
        sweeper::spawn_sweeper,
        worker::{HandlerRegistry, WorkerPool},
        ProcessingContext, JOB_CONVERT_WEXBIM, JOB_EXTRACT_PROPERTIES,
    },
    routes,
    storage::{LocalDiskStorage, StorageProvider},
    AppState, ServerConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    octopus_server::init_tracing();

    let config = Arc::new(ServerConfig::from_env().context("loading configuration")?);

    let pool = db::connect(&config.database_url)
        .await
        .context("connecting to database")?;
    db::migrate(&pool).await.context("running migrations")?;

    // At-least-once delivery: jobs a dead process left claimed go back on
    // the queue before workers start.
    let requeued = db::jobs::JobRepository::requeue_stale_running(&pool).await?;
    if requeued > 0 {
        info!(requeued, "returned interrupted jobs to the queue");
    }

    let storage: Arc<dyn StorageProvider> = Arc::new(LocalDiskStorage::new(&config.storage_root));
    let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::new(pool.clone()));
    let progress = Arc::new(ProgressBus::new());
    let converter: Arc<dyn WexBimConverter> = Arc::new(ExternalCommandConverter::new(
        config.processing.converter_command.clone(),
    ));

    let state = AppState::new(
        pool.clone(),
        Arc::clone(&config),
        Arc::clone(&storage),
        Arc::clone(&queue),
        Arc::clone(&progress),
    );

    let processing_ctx = Arc::new(ProcessingContext {
        pool: pool.clone(),
        storage: Arc::clone(&storage),
        converter,
        notifier: Arc::clone(&progress) as Arc<dyn ProgressNotifier>,
    });
    let registry = Arc::new(
        HandlerRegistry::new()
            .register(
                JOB_CONVERT_WEXBIM,
                Arc::new(ConvertWexBimHandler::new(Arc::clone(&processing_ctx))),
            )
            .register(
                JOB_EXTRACT_PROPERTIES,
                Arc::new(ExtractPropertiesHandler::new(processing_ctx)),
            ),
    );

    let cancel = CancellationToken::new();
    let workers = WorkerPool::start(
        Arc::clone(&queue),
        registry,
        config.processing.clone(),
        cancel.clone(),
    );
    let sweeper = spawn_sweeper(
        pool.clone(),
        Arc::clone(&storage),
        Duration::from_secs(config.processing.sweep_interval_secs),
        cancel.clone(),
    );

    let app = routes::app_router(state);
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "octopus listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving")?;

    info!("shutting down");
    cancel.cancel();
    workers.join().await;
    let _ = sweeper.await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "failed to listen for shutdown signal");
    }
}
