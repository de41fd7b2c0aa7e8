//! Background housekeeping: expire overdue upload sessions (deleting their
//! temp bytes best-effort) and drop dead authorization codes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::db::auth_codes::AuthCodeRepository;
use crate::db::upload_sessions::UploadSessionRepository;
use crate::storage::StorageProvider;

pub fn spawn_sweeper(
    pool: SqlitePool,
    storage: Arc<dyn StorageProvider>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "starting expiry sweeper");

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick so startup work settles first.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => run_sweep(&pool, storage.as_ref()).await,
                _ = cancel.cancelled() => {
                    info!("expiry sweeper stopped");
                    break;
                }
            }
        }
    })
}

#[instrument(name = "sweeper.run", skip_all)]
pub async fn run_sweep(pool: &SqlitePool, storage: &dyn StorageProvider) {
    let now = Utc::now();

    match UploadSessionRepository::expire_due(pool, now).await {
        Ok(expired) => {
            if !expired.is_empty() {
                info!(count = expired.len(), "expired overdue upload sessions");
            }
            for session in expired {
                if let Some(key) = &session.temp_storage_key {
                    if let Err(error) = storage.delete(key).await {
                        warn!(session_id = %session.id, %error, "failed to delete temp bytes");
                    }
                }
            }
        }
        Err(error) => warn!(%error, "upload session sweep failed"),
    }

    match AuthCodeRepository::delete_expired(pool, now).await {
        Ok(0) => {}
        Ok(count) => info!(count, "dropped expired authorization codes"),
        Err(error) => warn!(%error, "authorization code sweep failed"),
    }
}
