//! Boots the full server (HTTP, workers, storage, sqlite) on an ephemeral
//! port and drives it over the wire with reqwest.

// Each integration test binary compiles this module; not every binary uses
// every helper.
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use secrecy::SecretString;
use serde_json::Value;
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use octopus_server::{
    config::{
        AuthConfig, AuthMode, DatabaseProvider, DevPrincipalConfig, ProcessingConfig,
        ServerConfig, StorageProviderKind,
    },
    db,
    processing::{
        convert_wexbim::ConvertWexBimHandler,
        converter::{ConvertError, WexBimConverter},
        extract_properties::ExtractPropertiesHandler,
        progress::{ProgressBus, ProgressNotifier},
        queue::{JobQueue, SqliteJobQueue},
        worker::{HandlerRegistry, WorkerPool},
        ProcessingContext, JOB_CONVERT_WEXBIM, JOB_EXTRACT_PROPERTIES,
    },
    routes,
    storage::{LocalDiskStorage, StorageProvider},
    AppState,
};

pub const JWT_SECRET_BYTES: [u8; 32] = [0x42; 32];

/// Deterministic stand-in for the external geometry engine: the "mesh" is
/// the source bytes behind a magic prefix.
pub const FAKE_WEXBIM_MAGIC: &[u8] = b"WEXBIM-FAKE:";

pub struct FakeConverter;

#[async_trait]
impl WexBimConverter for FakeConverter {
    async fn convert(
        &self,
        input: &Path,
        output: &Path,
        _cancel: &CancellationToken,
    ) -> Result<(), ConvertError> {
        let source = tokio::fs::read(input).await?;
        let mut bytes = FAKE_WEXBIM_MAGIC.to_vec();
        bytes.extend_from_slice(&source);
        tokio::fs::write(output, bytes).await?;
        Ok(())
    }
}

pub struct TestApp {
    pub base_url: String,
    pub client: reqwest::Client,
    pub pool: SqlitePool,
    pub queue: Arc<dyn JobQueue>,
    config: Arc<ServerConfig>,
    _storage_dir: tempfile::TempDir,
    _db_dir: tempfile::TempDir,
    cancel: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(|_| {}).await
    }

    pub async fn spawn_with(tweak: impl FnOnce(&mut ServerConfig)) -> Self {
        let db_dir = tempfile::tempdir().expect("tempdir");
        let storage_dir = tempfile::tempdir().expect("tempdir");
        let database_url = format!("sqlite:{}", db_dir.path().join("octopus.db").display());

        let mut config = ServerConfig {
            database_provider: DatabaseProvider::Sqlite,
            database_url,
            listen_addr: "127.0.0.1:0".to_string(),
            storage_provider: StorageProviderKind::LocalDisk,
            storage_root: storage_dir.path().display().to_string(),
            auth: AuthConfig {
                mode: AuthMode::Development,
                dev: DevPrincipalConfig {
                    subject: "dev-user".to_string(),
                    email: Some("dev@example.test".to_string()),
                    display_name: Some("Dev User".to_string()),
                },
                oidc: None,
                jwt_secret: SecretString::new(
                    BASE64_STANDARD.encode(JWT_SECRET_BYTES).into(),
                ),
                access_token_ttl_secs: 3600,
                code_ttl_secs: 60,
            },
            processing: ProcessingConfig {
                workers: 2,
                max_attempts: 3,
                backoff_base_ms: 50,
                backoff_max_ms: 200,
                sweep_interval_secs: 3600,
                converter_command: None,
            },
            workspace_quota_bytes: None,
            upload_ttl_secs: 3600,
        };
        tweak(&mut config);
        let config = Arc::new(config);

        let pool = db::connect(&config.database_url).await.expect("connect");
        db::migrate(&pool).await.expect("migrate");

        let storage: Arc<dyn StorageProvider> =
            Arc::new(LocalDiskStorage::new(&config.storage_root));
        let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::new(pool.clone()));
        let progress = Arc::new(ProgressBus::new());

        let state = AppState::new(
            pool.clone(),
            Arc::clone(&config),
            Arc::clone(&storage),
            Arc::clone(&queue),
            Arc::clone(&progress),
        );

        let ctx = Arc::new(ProcessingContext {
            pool: pool.clone(),
            storage: Arc::clone(&storage),
            converter: Arc::new(FakeConverter),
            notifier: Arc::clone(&progress) as Arc<dyn ProgressNotifier>,
        });
        let registry = Arc::new(
            HandlerRegistry::new()
                .register(
                    JOB_CONVERT_WEXBIM,
                    Arc::new(ConvertWexBimHandler::new(Arc::clone(&ctx))),
                )
                .register(
                    JOB_EXTRACT_PROPERTIES,
                    Arc::new(ExtractPropertiesHandler::new(ctx)),
                ),
        );

        let cancel = CancellationToken::new();
        let _workers = WorkerPool::start(
            Arc::clone(&queue),
            registry,
            config.processing.clone(),
            cancel.clone(),
        );

        let app = routes::app_router(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("local addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("client");

        Self {
            base_url: format!("http://{addr}"),
            client,
            pool,
            queue,
            config,
            _storage_dir: storage_dir,
            _db_dir: db_dir,
            cancel,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Mint a bearer token for an arbitrary subject, so tests can act as
    /// several distinct users.
    pub fn token_for(&self, subject: &str, workspace_id: Uuid, scopes: &str) -> String {
        let signer =
            octopus_server::auth::jwt::TokenSigner::new(&JWT_SECRET_BYTES, None, None);
        signer.issue(
            subject,
            workspace_id,
            "test-harness",
            scopes,
            self.config.auth.access_token_ttl_secs,
            chrono::Utc::now(),
        )
    }

    // ── High-level API helpers (dev principal unless a token is given) ──

    pub async fn post_json(&self, path: &str, body: Value, token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.post(self.url(path)).json(&body);
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("request")
    }

    pub async fn get(&self, path: &str, token: Option<&str>) -> reqwest::Response {
        let mut request = self.client.get(self.url(path));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }
        request.send().await.expect("request")
    }

    pub async fn create_workspace(&self, name: &str) -> Value {
        let response = self
            .post_json("/api/v1/workspaces", serde_json::json!({ "name": name }), None)
            .await;
        assert_eq!(response.status(), 201, "create workspace");
        response.json().await.expect("json")
    }

    pub async fn create_project(&self, workspace_id: &str, name: &str) -> Value {
        let response = self
            .post_json(
                &format!("/api/v1/workspaces/{workspace_id}/projects"),
                serde_json::json!({ "name": name }),
                None,
            )
            .await;
        assert_eq!(response.status(), 201, "create project");
        response.json().await.expect("json")
    }

    /// Reserve + upload + commit in one sweep; returns the committed file.
    pub async fn upload_file(
        &self,
        project_id: &str,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Value {
        let session = self
            .post_json(
                &format!("/api/v1/projects/{project_id}/files/reserve"),
                serde_json::json!({ "file_name": file_name }),
                None,
            )
            .await;
        assert_eq!(session.status(), 201, "reserve");
        let session: Value = session.json().await.expect("json");
        let session_id = session["id"].as_str().expect("session id").to_string();

        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("file", part);
        let uploaded = self
            .client
            .post(self.url(&format!(
                "/api/v1/projects/{project_id}/files/sessions/{session_id}/content"
            )))
            .multipart(form)
            .send()
            .await
            .expect("upload");
        assert_eq!(uploaded.status(), 200, "upload content");

        let committed = self
            .post_json(
                &format!("/api/v1/projects/{project_id}/files/sessions/{session_id}/commit"),
                serde_json::json!({}),
                None,
            )
            .await;
        assert_eq!(committed.status(), 200, "commit");
        committed.json().await.expect("json")
    }
}

/// Poll until `probe` yields `Some`, or panic after ~10 seconds.
pub async fn wait_for<T, F, Fut>(mut probe: F) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Option<T>>,
{
    for _ in 0..100 {
        if let Some(value) = probe().await {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("condition not reached within 10s");
}

/// A miniature but structurally-valid IFC model.
pub const SAMPLE_IFC: &str = "ISO-10303-21;\n\
HEADER;\nFILE_DESCRIPTION((''),'2;1');\nFILE_NAME('SampleHouse.ifc','',(''),(''),'','','');\nFILE_SCHEMA(('IFC4'));\nENDSEC;\n\
DATA;\n\
#10=IFCBUILDINGSTOREY('storey-guid',$,'Level 1',$,$,$,$,$,.ELEMENT.,0.0);\n\
#20=IFCWALL('wall-guid',$,'Wall-01','A wall',$,$,$,'W-01');\n\
#30=IFCRELCONTAINEDINSPATIALSTRUCTURE('rel-guid',$,$,$,(#20),#10);\n\
#40=IFCPROPERTYSET('pset-guid',$,'Pset_WallCommon',$,(#41));\n\
#41=IFCPROPERTYSINGLEVALUE('IsExternal',$,IFCBOOLEAN(.T.),$);\n\
#50=IFCRELDEFINESBYPROPERTIES('relp-guid',$,$,$,(#20),#40);\n\
#60=IFCELEMENTQUANTITY('qset-guid',$,'BaseQuantities',$,$,(#61));\n\
#61=IFCQUANTITYAREA('NetSideArea',$,$,12.5);\n\
#51=IFCRELDEFINESBYPROPERTIES('relq-guid',$,$,$,(#20),#60);\n\
ENDSEC;\nEND-ISO-10303-21;\n";
