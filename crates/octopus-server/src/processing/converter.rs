//! Seam to the external IFC -> WexBIM geometry engine.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("converter not configured")]
    NotConfigured,
    #[error("converter i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("converter exited with {status}: {stderr}")]
    Failed { status: i32, stderr: String },
    #[error("conversion cancelled")]
    Cancelled,
    #[error("converter produced no output")]
    NoOutput,
}

/// The geometry engine is consumed as an opaque converter: IFC path in,
/// WexBIM path out.
#[async_trait]
pub trait WexBimConverter: Send + Sync {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError>;
}

/// Runs the configured external command as `<command> <input> <output>`.
pub struct ExternalCommandConverter {
    command: Option<String>,
}

impl ExternalCommandConverter {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WexBimConverter for ExternalCommandConverter {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        let command = self.command.as_deref().ok_or(ConvertError::NotConfigured)?;

        let mut child = tokio::process::Command::new(command)
            .arg(input)
            .arg(output)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stderr = child.stderr.take();
        let result = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(ConvertError::Cancelled);
            }
        };

        if !result.success() {
            let mut captured = String::new();
            if let Some(mut stderr) = stderr {
                use tokio::io::AsyncReadExt;
                let _ = stderr.read_to_string(&mut captured).await;
            }
            captured.truncate(2000);
            return Err(ConvertError::Failed {
                status: result.code().unwrap_or(-1),
                stderr: captured,
            });
        }

        if tokio::fs::metadata(output).await.is_err() {
            return Err(ConvertError::NoOutput);
        }

        Ok(())
    }
}
