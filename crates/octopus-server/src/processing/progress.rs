//! Processing progress fan-out.
//!
//! Subscribers key on the model version they care about; transports (SSE,
//! WebSocket, ...) sit on top of [`ProgressBus::subscribe`] and are not
//! this crate's concern. A notifier failure must never fail the job that
//! reported it.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobProgress {
    pub job_id: Uuid,
    pub model_version_id: Uuid,
    pub stage: String,
    pub percent_complete: u8,
    pub message: String,
    pub is_complete: bool,
    pub is_success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

pub trait ProgressNotifier: Send + Sync {
    /// Best-effort delivery; implementations swallow their own failures.
    fn notify(&self, progress: JobProgress);
}

/// In-process pub/sub with one broadcast channel per model version.
pub struct ProgressBus {
    channels: Mutex<HashMap<Uuid, broadcast::Sender<JobProgress>>>,
}

const CHANNEL_CAPACITY: usize = 64;

impl ProgressBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self, model_version_id: Uuid) -> broadcast::Receiver<JobProgress> {
        let mut channels = self.channels.lock().expect("progress bus lock");
        channels
            .entry(model_version_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressNotifier for ProgressBus {
    fn notify(&self, progress: JobProgress) {
        let mut channels = self.channels.lock().expect("progress bus lock");
        if let Some(sender) = channels.get(&progress.model_version_id) {
            // A send error just means nobody is listening right now.
            if sender.receiver_count() == 0 {
                channels.remove(&progress.model_version_id);
            } else if let Err(error) = sender.send(progress) {
                tracing::warn!(%error, "dropping progress event");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(version: Uuid, stage: &str) -> JobProgress {
        JobProgress {
            job_id: Uuid::new_v4(),
            model_version_id: version,
            stage: stage.to_string(),
            percent_complete: 50,
            message: String::new(),
            is_complete: false,
            is_success: false,
            error_message: None,
        }
    }

    #[tokio::test]
    async fn delivers_to_version_subscribers_only() {
        let bus = ProgressBus::new();
        let version = Uuid::new_v4();
        let other = Uuid::new_v4();

        let mut rx = bus.subscribe(version);
        bus.notify(event(other, "ignored"));
        bus.notify(event(version, "converting"));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.stage, "converting");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn notify_without_subscribers_is_harmless() {
        let bus = ProgressBus::new();
        bus.notify(event(Uuid::new_v4(), "nobody listening"));
    }
}
