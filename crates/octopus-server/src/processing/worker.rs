//! Worker pool: long-lived tasks draining the queue through a handler
//! registry keyed by job type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::queue::{JobEnvelope, JobQueue};
use crate::config::ProcessingConfig;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler observed the cancellation signal at a checkpoint; the job
    /// is re-enqueued with its attempt counter unchanged.
    #[error("cancelled")]
    Cancelled,
    /// Anything retryable: the worker applies the backoff policy.
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(error: impl std::fmt::Display) -> Self {
        HandlerError::Failed(error.to_string())
    }
}

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(
        &self,
        envelope: &JobEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Registration is append-only at startup; a job whose type is no longer
/// registered drains as a terminal failure.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, job_type: &str, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type.to_string(), handler);
        self
    }

    fn get(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

const IDLE_POLL: Duration = Duration::from_millis(250);

impl WorkerPool {
    /// Start `config.workers` drain loops. Workers stop cooperatively when
    /// `cancel` fires, between jobs or at the running handler's next
    /// checkpoint.
    pub fn start(
        queue: Arc<dyn JobQueue>,
        registry: Arc<HandlerRegistry>,
        config: ProcessingConfig,
        cancel: CancellationToken,
    ) -> Self {
        let handles = (0..config.workers)
            .map(|worker| {
                let queue = Arc::clone(&queue);
                let registry = Arc::clone(&registry);
                let config = config.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    info!(worker, "worker started");
                    run_worker(worker, queue, registry, config, cancel).await;
                    info!(worker, "worker stopped");
                })
            })
            .collect();

        Self { handles }
    }

    pub async fn join(self) {
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn run_worker(
    worker: usize,
    queue: Arc<dyn JobQueue>,
    registry: Arc<HandlerRegistry>,
    config: ProcessingConfig,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        let envelope = match queue.dequeue().await {
            Ok(Some(envelope)) => envelope,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL) => continue,
                    _ = cancel.cancelled() => break,
                }
            }
            Err(error) => {
                error!(worker, %error, "dequeue failed");
                tokio::select! {
                    _ = tokio::time::sleep(IDLE_POLL) => continue,
                    _ = cancel.cancelled() => break,
                }
            }
        };

        if let Ok(backlog) = queue.backlog().await {
            tracing::debug!(worker, backlog, "claimed job");
        }

        process_one(worker, &queue, &registry, &config, &cancel, envelope).await;
    }
}

#[instrument(
    name = "worker.process",
    skip(queue, registry, config, cancel, envelope),
    fields(job_id = %envelope.job_id, job_type = %envelope.job_type, attempt = envelope.attempt)
)]
async fn process_one(
    worker: usize,
    queue: &Arc<dyn JobQueue>,
    registry: &Arc<HandlerRegistry>,
    config: &ProcessingConfig,
    cancel: &CancellationToken,
    envelope: JobEnvelope,
) {
    let Some(handler) = registry.get(&envelope.job_type) else {
        warn!(worker, "no handler registered, draining as failure");
        if let Err(error) = queue.fail(envelope.job_id, "no handler registered").await {
            error!(%error, "failed to mark unroutable job");
        }
        return;
    };

    match handler.handle(&envelope, cancel).await {
        Ok(()) => {
            if let Err(error) = queue.complete(envelope.job_id).await {
                error!(%error, "failed to complete job");
            }
        }
        Err(HandlerError::Cancelled) => {
            // Idempotency covers the partial work; redeliver as-is.
            if let Err(error) = queue
                .retry(envelope.job_id, envelope.attempt, Duration::ZERO, None)
                .await
            {
                error!(%error, "failed to re-enqueue cancelled job");
            }
        }
        Err(HandlerError::Failed(message)) => {
            // Retry while the attempt that just failed is below the limit.
            if envelope.attempt < config.max_attempts {
                let next_attempt = envelope.attempt + 1;
                let delay = backoff_delay(config, envelope.attempt);
                warn!(worker, %message, next_attempt, delay_ms = delay.as_millis() as u64, "job failed, retrying");
                if let Err(error) = queue
                    .retry(envelope.job_id, next_attempt, delay, Some(&message))
                    .await
                {
                    error!(%error, "failed to schedule retry");
                }
            } else {
                error!(worker, %message, "job failed terminally");
                if let Err(error) = queue.fail(envelope.job_id, &message).await {
                    error!(%error, "failed to mark terminal failure");
                }
            }
        }
    }
}

/// `base * 2^attempt`, capped.
fn backoff_delay(config: &ProcessingConfig, attempt: u32) -> Duration {
    let exp = attempt.min(20);
    let ms = config
        .backoff_base_ms
        .saturating_mul(1u64 << exp)
        .min(config.backoff_max_ms);
    Duration::from_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base: u64, max: u64) -> ProcessingConfig {
        ProcessingConfig {
            workers: 1,
            max_attempts: 3,
            backoff_base_ms: base,
            backoff_max_ms: max,
            sweep_interval_secs: 60,
            converter_command: None,
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let config = config(1000, 60_000);
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(1000));
        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(2000));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(4000));
        assert_eq!(backoff_delay(&config, 10), Duration::from_millis(60_000));
    }
}
