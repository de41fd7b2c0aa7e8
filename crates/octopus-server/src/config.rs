use std::env;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable `{0}` is not set")]
    MissingVar(&'static str),
    #[error("invalid value for environment variable `{0}`")]
    InvalidVar(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatabaseProvider {
    Sqlite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageProviderKind {
    LocalDisk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Development,
    Oidc,
}

#[derive(Debug, Clone)]
pub struct DevPrincipalConfig {
    pub subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OidcConfig {
    pub authority: String,
    pub audience: String,
    pub require_https_metadata: bool,
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub dev: DevPrincipalConfig,
    pub oidc: Option<OidcConfig>,
    pub jwt_secret: SecretString,
    pub access_token_ttl_secs: i64,
    pub code_ttl_secs: i64,
}

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub workers: usize,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub sweep_interval_secs: u64,
    /// External IFC -> WexBIM geometry command, invoked as
    /// `<command> <input.ifc> <output.wexbim>`.
    pub converter_command: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_provider: DatabaseProvider,
    pub database_url: String,
    pub listen_addr: String,
    pub storage_provider: StorageProviderKind,
    pub storage_root: String,
    pub auth: AuthConfig,
    pub processing: ProcessingConfig,
    /// Default workspace quota; a per-workspace value overrides it.
    pub workspace_quota_bytes: Option<i64>,
    /// How long a reserved upload session stays valid (T_reserve).
    pub upload_ttl_secs: i64,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_provider = match env::var("OCTOPUS_DATABASE_PROVIDER").as_deref() {
            Ok("sqlite") | Err(_) => DatabaseProvider::Sqlite,
            Ok(_) => return Err(ConfigError::InvalidVar("OCTOPUS_DATABASE_PROVIDER")),
        };

        let database_url = env::var("OCTOPUS_DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("OCTOPUS_DATABASE_URL"))?;

        let listen_addr =
            env::var("OCTOPUS_LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let storage_provider = match env::var("OCTOPUS_STORAGE_PROVIDER").as_deref() {
            Ok("local_disk") | Err(_) => StorageProviderKind::LocalDisk,
            Ok(_) => return Err(ConfigError::InvalidVar("OCTOPUS_STORAGE_PROVIDER")),
        };

        let storage_root = env::var("OCTOPUS_STORAGE_ROOT")
            .map_err(|_| ConfigError::MissingVar("OCTOPUS_STORAGE_ROOT"))?;

        let auth = AuthConfig::from_env()?;
        let processing = ProcessingConfig::from_env()?;

        let workspace_quota_bytes = match env::var("OCTOPUS_WORKSPACE_QUOTA_BYTES") {
            Ok(v) => Some(
                v.parse()
                    .map_err(|_| ConfigError::InvalidVar("OCTOPUS_WORKSPACE_QUOTA_BYTES"))?,
            ),
            Err(_) => None,
        };

        let upload_ttl_secs = int_var("OCTOPUS_UPLOAD_TTL_SECS", 86_400)?;

        Ok(Self {
            database_provider,
            database_url,
            listen_addr,
            storage_provider,
            storage_root,
            auth,
            processing,
            workspace_quota_bytes,
            upload_ttl_secs,
        })
    }
}

impl AuthConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let mode = match env::var("OCTOPUS_AUTH_MODE").as_deref() {
            Ok("development") | Err(_) => AuthMode::Development,
            Ok("oidc") => AuthMode::Oidc,
            Ok(_) => return Err(ConfigError::InvalidVar("OCTOPUS_AUTH_MODE")),
        };

        let dev = DevPrincipalConfig {
            subject: env::var("OCTOPUS_DEV_SUBJECT").unwrap_or_else(|_| "dev-user".to_string()),
            email: env::var("OCTOPUS_DEV_EMAIL").ok(),
            display_name: env::var("OCTOPUS_DEV_DISPLAY_NAME").ok(),
        };

        let oidc = match env::var("OCTOPUS_OIDC_AUTHORITY") {
            Ok(authority) => {
                let audience = env::var("OCTOPUS_OIDC_AUDIENCE")
                    .map_err(|_| ConfigError::MissingVar("OCTOPUS_OIDC_AUDIENCE"))?;
                let require_https_metadata = env::var("OCTOPUS_OIDC_REQUIRE_HTTPS")
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(true);
                Some(OidcConfig {
                    authority,
                    audience,
                    require_https_metadata,
                })
            }
            Err(_) => None,
        };

        if mode == AuthMode::Oidc && oidc.is_none() {
            return Err(ConfigError::MissingVar("OCTOPUS_OIDC_AUTHORITY"));
        }

        let jwt_secret =
            env::var("OCTOPUS_JWT_SECRET").map_err(|_| ConfigError::MissingVar("OCTOPUS_JWT_SECRET"))?;
        validate_jwt_secret(&jwt_secret)?;

        Ok(Self {
            mode,
            dev,
            oidc,
            jwt_secret: SecretString::new(jwt_secret.into()),
            access_token_ttl_secs: int_var("OCTOPUS_ACCESS_TOKEN_TTL_SECS", 3600)?,
            code_ttl_secs: int_var("OCTOPUS_CODE_TTL_SECS", 60)?,
        })
    }
}

impl ProcessingConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let workers = int_var("OCTOPUS_WORKERS", 2)? as usize;
        if workers == 0 {
            return Err(ConfigError::InvalidVar("OCTOPUS_WORKERS"));
        }
        let max_attempts = int_var("OCTOPUS_MAX_ATTEMPTS", 3)? as u32;
        if max_attempts == 0 {
            return Err(ConfigError::InvalidVar("OCTOPUS_MAX_ATTEMPTS"));
        }

        Ok(Self {
            workers,
            max_attempts,
            backoff_base_ms: int_var("OCTOPUS_BACKOFF_BASE_MS", 1000)? as u64,
            backoff_max_ms: int_var("OCTOPUS_BACKOFF_MAX_MS", 60_000)? as u64,
            sweep_interval_secs: int_var("OCTOPUS_SWEEP_INTERVAL_SECS", 60)? as u64,
            converter_command: env::var("OCTOPUS_CONVERTER_COMMAND").ok(),
        })
    }
}

fn int_var(name: &'static str, default: i64) -> Result<i64, ConfigError> {
    match env::var(name) {
        Ok(v) => v.parse().map_err(|_| ConfigError::InvalidVar(name)),
        Err(_) => Ok(default),
    }
}

fn validate_jwt_secret(secret: &str) -> Result<(), ConfigError> {
    let decoded = BASE64_STANDARD
        .decode(secret.as_bytes())
        .map_err(|_| ConfigError::InvalidVar("OCTOPUS_JWT_SECRET"))?;

    if decoded.len() < 32 {
        return Err(ConfigError::InvalidVar("OCTOPUS_JWT_SECRET"));
    }

    Ok(())
}
