//! `extract_properties` job: IFC source -> properties JSON artifact.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use octopus_ifc::{extract_properties, IfcDocument};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::progress::JobProgress;
use super::queue::JobEnvelope;
use super::worker::{HandlerError, JobHandler};
use super::{ModelVersionJob, ProcessingContext};
use crate::auth::crypto::hash_bytes;
use crate::db::file_links::FileLinkRepository;
use crate::db::files::{FileRepository, NewFile};
use crate::db::model_versions::ModelVersionRepository;
use crate::db::projects::ProjectRepository;
use crate::domain::{FileCategory, FileKind, LinkType};
use crate::files::{allocate_storage_key, StoragePoolName};

pub struct ExtractPropertiesHandler {
    ctx: Arc<ProcessingContext>,
}

impl ExtractPropertiesHandler {
    pub fn new(ctx: Arc<ProcessingContext>) -> Self {
        Self { ctx }
    }

    fn notify(&self, envelope: &JobEnvelope, version_id: Uuid, stage: &str, percent: u8) {
        self.ctx.notifier.notify(JobProgress {
            job_id: envelope.job_id,
            model_version_id: version_id,
            stage: stage.to_string(),
            percent_complete: percent,
            message: format!("Property extraction: {stage}"),
            is_complete: false,
            is_success: false,
            error_message: None,
        });
    }

    fn notify_done(&self, envelope: &JobEnvelope, version_id: Uuid, error: Option<&str>) {
        self.ctx.notifier.notify(JobProgress {
            job_id: envelope.job_id,
            model_version_id: version_id,
            stage: if error.is_some() { "Failed" } else { "Extracted" }.to_string(),
            percent_complete: 100,
            message: match error {
                Some(e) => format!("Property extraction failed: {e}"),
                None => "Property extraction complete".to_string(),
            },
            is_complete: true,
            is_success: error.is_none(),
            error_message: error.map(str::to_string),
        });
    }

    async fn fail_version(
        &self,
        envelope: &JobEnvelope,
        version_id: Uuid,
        message: String,
    ) -> HandlerError {
        if let Err(error) =
            ModelVersionRepository::mark_failed(&self.ctx.pool, version_id, &message).await
        {
            tracing::error!(%error, "failed to record version failure");
        }
        self.notify_done(envelope, version_id, Some(&message));
        HandlerError::Failed(message)
    }
}

#[async_trait]
impl JobHandler for ExtractPropertiesHandler {
    #[instrument(name = "jobs.extract_properties", skip_all, fields(job_id = %envelope.job_id))]
    async fn handle(
        &self,
        envelope: &JobEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let job: ModelVersionJob =
            serde_json::from_str(&envelope.payload).map_err(HandlerError::failed)?;
        let version_id = job.model_version_id;

        let version = ModelVersionRepository::find_by_id(&self.ctx.pool, version_id)
            .await
            .map_err(HandlerError::failed)?
            .ok_or_else(|| HandlerError::Failed(format!("model version {version_id} not found")))?;
        if version.properties_file_id.is_some() {
            info!(%version_id, "properties artifact already present, skipping");
            return Ok(());
        }

        let claimed = ModelVersionRepository::begin_processing(&self.ctx.pool, version_id)
            .await
            .map_err(HandlerError::failed)?;
        if !claimed {
            return Err(HandlerError::Failed(format!(
                "model version {version_id} is not processable"
            )));
        }

        let ifc = match FileRepository::find_by_id(&self.ctx.pool, version.ifc_file_id).await {
            Ok(Some(file)) if !file.is_deleted => file,
            Ok(_) => {
                return Err(self
                    .fail_version(envelope, version_id, "source IFC file is gone".to_string())
                    .await)
            }
            Err(error) => return Err(HandlerError::failed(error)),
        };

        if cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.notify(envelope, version_id, "Reading", 10);

        let mut stream = match self.ctx.storage.open_read(&ifc.storage_key).await {
            Ok(Some(stream)) => stream,
            Ok(None) => {
                return Err(self
                    .fail_version(
                        envelope,
                        version_id,
                        format!("storage inconsistency: missing bytes for {}", ifc.storage_key),
                    )
                    .await)
            }
            Err(error) => return Err(HandlerError::failed(error)),
        };
        let mut raw = Vec::with_capacity(ifc.size_bytes.max(0) as usize);
        stream
            .read_to_end(&mut raw)
            .await
            .map_err(HandlerError::failed)?;
        let content = String::from_utf8_lossy(&raw).into_owned();
        drop(raw);

        if cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.notify(envelope, version_id, "Extracting", 40);

        let document = match IfcDocument::parse(content) {
            Ok(doc) => extract_properties(&doc, Utc::now()),
            Err(error) => {
                return Err(self.fail_version(envelope, version_id, error.to_string()).await)
            }
        };
        let body = serde_json::to_vec(&document).map_err(HandlerError::failed)?;

        if cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.notify(envelope, version_id, "Uploading", 75);

        let project = ProjectRepository::find_by_id(&self.ctx.pool, ifc.project_id)
            .await
            .map_err(HandlerError::failed)?
            .ok_or_else(|| HandlerError::Failed("owning project is gone".to_string()))?;

        let artifact_name = format!(
            "{}.properties.json",
            ifc.name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(&ifc.name)
        );
        let artifact_key = allocate_storage_key(
            project.workspace_id,
            project.id,
            StoragePoolName::Artifacts,
            &artifact_name,
        );

        let checksum = hash_bytes(&body);
        let size_bytes = body.len() as i64;
        self.ctx
            .storage
            .put(
                &artifact_key,
                std::pin::pin!(std::io::Cursor::new(body)),
                Some("application/json"),
            )
            .await
            .map_err(HandlerError::failed)?;

        let mut tx = self.ctx.pool.begin().await.map_err(HandlerError::failed)?;
        let artifact = FileRepository::create(
            &mut *tx,
            NewFile {
                project_id: project.id,
                name: &artifact_name,
                content_type: Some("application/json"),
                size_bytes,
                checksum: Some(&checksum),
                kind: FileKind::Artifact,
                category: FileCategory::Properties,
                storage_provider: self.ctx.storage.provider_id(),
                storage_key: &artifact_key,
            },
        )
        .await
        .map_err(HandlerError::failed)?;

        FileLinkRepository::create_checked(&mut *tx, ifc.id, artifact.id, LinkType::PropertiesOf)
            .await
            .map_err(HandlerError::failed)?;

        let updated =
            ModelVersionRepository::set_properties_artifact(&mut *tx, version_id, artifact.id)
                .await
                .map_err(HandlerError::failed)?;
        if !updated {
            drop(tx);
            let _ = self.ctx.storage.delete(&artifact_key).await;
            return Err(HandlerError::Failed(format!(
                "model version {version_id} left processing state mid-extraction"
            )));
        }
        tx.commit().await.map_err(HandlerError::failed)?;

        self.notify_done(envelope, version_id, None);
        info!(
            %version_id,
            artifact_id = %artifact.id,
            elements = document.total_elements,
            "properties artifact ready"
        );
        Ok(())
    }
}

