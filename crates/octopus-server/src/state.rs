use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use secrecy::ExposeSecret;
use sqlx::SqlitePool;

use crate::{
    auth::jwt::TokenSigner,
    config::ServerConfig,
    processing::{progress::ProgressBus, queue::JobQueue},
    storage::StorageProvider,
};

#[derive(Clone)]
pub struct AppState {
    pool: SqlitePool,
    config: Arc<ServerConfig>,
    storage: Arc<dyn StorageProvider>,
    queue: Arc<dyn JobQueue>,
    progress: Arc<ProgressBus>,
    signer: Arc<TokenSigner>,
}

impl AppState {
    pub fn new(
        pool: SqlitePool,
        config: Arc<ServerConfig>,
        storage: Arc<dyn StorageProvider>,
        queue: Arc<dyn JobQueue>,
        progress: Arc<ProgressBus>,
    ) -> Self {
        let secret = BASE64_STANDARD
            .decode(config.auth.jwt_secret.expose_secret())
            .expect("jwt secret validated at config load");
        let (issuer, audience) = match &config.auth.oidc {
            Some(oidc) => (Some(oidc.authority.clone()), Some(oidc.audience.clone())),
            None => (None, None),
        };
        let signer = Arc::new(TokenSigner::new(&secret, issuer, audience));

        Self {
            pool,
            config,
            storage,
            queue,
            progress,
            signer,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn progress(&self) -> &Arc<ProgressBus> {
        &self.progress
    }

    pub fn token_signer(&self) -> &TokenSigner {
        &self.signer
    }
}
