//! `convert_wexbim` job: IFC source -> WexBIM artifact.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};
use uuid::Uuid;

use super::converter::ConvertError;
use super::progress::JobProgress;
use super::queue::JobEnvelope;
use super::worker::{HandlerError, JobHandler};
use super::{ModelVersionJob, ProcessingContext};
use crate::db::file_links::FileLinkRepository;
use crate::db::files::{FileRepository, NewFile};
use crate::db::model_versions::{ModelVersion, ModelVersionRepository};
use crate::db::projects::ProjectRepository;
use crate::domain::{FileCategory, FileKind, LinkType};
use crate::files::{allocate_storage_key, StoragePoolName};

pub struct ConvertWexBimHandler {
    ctx: Arc<ProcessingContext>,
}

impl ConvertWexBimHandler {
    pub fn new(ctx: Arc<ProcessingContext>) -> Self {
        Self { ctx }
    }

    fn notify(&self, envelope: &JobEnvelope, version_id: Uuid, stage: &str, percent: u8) {
        self.ctx.notifier.notify(JobProgress {
            job_id: envelope.job_id,
            model_version_id: version_id,
            stage: stage.to_string(),
            percent_complete: percent,
            message: format!("WexBIM conversion: {stage}"),
            is_complete: false,
            is_success: false,
            error_message: None,
        });
    }

    fn notify_done(&self, envelope: &JobEnvelope, version_id: Uuid, error: Option<&str>) {
        self.ctx.notifier.notify(JobProgress {
            job_id: envelope.job_id,
            model_version_id: version_id,
            stage: if error.is_some() { "Failed" } else { "Converted" }.to_string(),
            percent_complete: 100,
            message: match error {
                Some(e) => format!("WexBIM conversion failed: {e}"),
                None => "WexBIM conversion complete".to_string(),
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

    async fn load_version(&self, version_id: Uuid) -> Result<ModelVersion, HandlerError> {
        ModelVersionRepository::find_by_id(&self.ctx.pool, version_id)
            .await
            .map_err(HandlerError::failed)?
            .ok_or_else(|| HandlerError::Failed(format!("model version {version_id} not found")))
    }
}

#[async_trait]
impl JobHandler for ConvertWexBimHandler {
    #[instrument(name = "jobs.convert_wexbim", skip_all, fields(job_id = %envelope.job_id))]
    async fn handle(
        &self,
        envelope: &JobEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let job: ModelVersionJob =
            serde_json::from_str(&envelope.payload).map_err(HandlerError::failed)?;
        let version_id = job.model_version_id;

        let version = self.load_version(version_id).await?;
        if version.wex_bim_file_id.is_some() {
            info!(%version_id, "wexbim artifact already present, skipping");
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
        self.notify(envelope, version_id, "Downloading", 10);

        // Stage the source on local disk for the external converter.
        let workdir = tempfile::tempdir().map_err(HandlerError::failed)?;
        let input_path = workdir.path().join("input.ifc");
        let output_path = workdir.path().join("output.wexbim");

        let source = match self.ctx.storage.open_read(&ifc.storage_key).await {
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
        write_stream_to_file(source, &input_path)
            .await
            .map_err(HandlerError::failed)?;

        if cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.notify(envelope, version_id, "Converting", 40);

        match self
            .ctx
            .converter
            .convert(&input_path, &output_path, cancel)
            .await
        {
            Ok(()) => {}
            Err(ConvertError::Cancelled) => return Err(HandlerError::Cancelled),
            Err(error) => {
                return Err(self.fail_version(envelope, version_id, error.to_string()).await)
            }
        }

        if cancel.is_cancelled() {
            return Err(HandlerError::Cancelled);
        }
        self.notify(envelope, version_id, "Uploading", 75);

        let project = ProjectRepository::find_by_id(&self.ctx.pool, ifc.project_id)
            .await
            .map_err(HandlerError::failed)?
            .ok_or_else(|| HandlerError::Failed("owning project is gone".to_string()))?;

        let artifact_name = format!("{}.wexbim", trim_extension(&ifc.name));
        let artifact_key = allocate_storage_key(
            project.workspace_id,
            project.id,
            StoragePoolName::Artifacts,
            &artifact_name,
        );

        let size_bytes = tokio::fs::metadata(&output_path)
            .await
            .map_err(HandlerError::failed)?
            .len() as i64;
        let output = tokio::fs::File::open(&output_path)
            .await
            .map_err(HandlerError::failed)?;
        self.ctx
            .storage
            .put(
                &artifact_key,
                std::pin::pin!(output),
                Some("application/octet-stream"),
            )
            .await
            .map_err(HandlerError::failed)?;

        let mut tx = self.ctx.pool.begin().await.map_err(HandlerError::failed)?;
        let artifact = FileRepository::create(
            &mut *tx,
            NewFile {
                project_id: project.id,
                name: &artifact_name,
                content_type: Some("application/octet-stream"),
                size_bytes,
                checksum: None,
                kind: FileKind::Artifact,
                category: FileCategory::WexBim,
                storage_provider: self.ctx.storage.provider_id(),
                storage_key: &artifact_key,
            },
        )
        .await
        .map_err(HandlerError::failed)?;

        FileLinkRepository::create_checked(&mut *tx, ifc.id, artifact.id, LinkType::DerivedFrom)
            .await
            .map_err(HandlerError::failed)?;

        let updated = ModelVersionRepository::set_wexbim_artifact(&mut *tx, version_id, artifact.id)
            .await
            .map_err(HandlerError::failed)?;
        if !updated {
            // Lost the status guard; drop the registry rows and let the
            // redelivery sort it out.
            drop(tx);
            let _ = self.ctx.storage.delete(&artifact_key).await;
            return Err(HandlerError::Failed(format!(
                "model version {version_id} left processing state mid-conversion"
            )));
        }
        tx.commit().await.map_err(HandlerError::failed)?;

        self.notify_done(envelope, version_id, None);
        info!(%version_id, artifact_id = %artifact.id, "wexbim artifact ready");
        Ok(())
    }
}

async fn write_stream_to_file(
    mut stream: crate::storage::ByteStream,
    path: &std::path::Path,
) -> std::io::Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let written = tokio::io::copy(&mut stream, &mut file).await?;
    file.sync_all().await?;
    Ok(written)
}

fn trim_extension(name: &str) -> &str {
    name.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(name)
}
