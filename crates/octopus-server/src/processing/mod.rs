pub mod convert_wexbim;
pub mod converter;
pub mod extract_properties;
pub mod progress;
pub mod queue;
pub mod sweeper;
pub mod worker;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::storage::StorageProvider;
use converter::WexBimConverter;
use progress::ProgressNotifier;

pub const JOB_CONVERT_WEXBIM: &str = "convert_wexbim";
pub const JOB_EXTRACT_PROPERTIES: &str = "extract_properties";

/// Payload shared by both core job types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersionJob {
    pub model_version_id: Uuid,
}

impl ModelVersionJob {
    pub fn payload(model_version_id: Uuid) -> String {
        serde_json::to_string(&ModelVersionJob { model_version_id })
            .expect("job payload serializes")
    }
}

/// Collaborators every job handler works against.
pub struct ProcessingContext {
    pub pool: SqlitePool,
    pub storage: Arc<dyn StorageProvider>,
    pub converter: Arc<dyn WexBimConverter>,
    pub notifier: Arc<dyn ProgressNotifier>,
}
