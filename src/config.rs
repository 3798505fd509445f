use thiserror::Error;

use crate::field::TempWritePolicy;
use crate::object_store::StoreKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Environment name used to scope storage roots and key prefixes.
    pub environment: String,
    /// Directory holding the metadata database.
    pub data_dir: String,
    pub storage: StorageConfig,
    /// Directory for transform scratch files.
    pub scratch_dir: String,
    /// Default lifetime of temporary metadata records, in seconds.
    pub default_expiry_secs: u64,
    /// Prune expired temporary records opportunistically after each write.
    pub prune_on_upload: bool,
    /// Default temp-write trigger policy for fields that don't override it.
    pub default_temp_write: TempWritePolicy,
    /// Maximum upload size in bytes, enforced by the upload validators.
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StoreKind,
    /// Root directory for the local backend
    pub local_root: String,
    pub s3: S3Config,
}

#[derive(Debug, Clone)]
pub struct S3Config {
    /// Bucket name (required when backend is s3)
    pub bucket: Option<String>,
    pub region: String,
    /// Key prefix under which all blobs are written
    pub prefix: String,
    pub access_key: String,
    pub secret_key: String,
    /// Custom endpoint for S3-compatible services (MinIO etc.)
    pub endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreKind::Local,
            local_root: "./uploads".to_string(),
            s3: S3Config::default(),
        }
    }
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: None,
            region: "us-east-1".to_string(),
            prefix: "attache".to_string(),
            access_key: String::new(),
            secret_key: String::new(),
            endpoint: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            data_dir: "./data".to_string(),
            storage: StorageConfig::default(),
            scratch_dir: std::env::temp_dir().to_string_lossy().into_owned(),
            default_expiry_secs: 24 * 60 * 60,
            prune_on_upload: true,
            default_temp_write: TempWritePolicy::OnRollback,
            max_upload_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let environment =
            std::env::var("ATTACHE_ENV").unwrap_or_else(|_| "development".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" => StoreKind::S3,
            _ => StoreKind::Local,
        };

        let local_root =
            std::env::var("LOCAL_STORAGE_ROOT").unwrap_or_else(|_| "./uploads".to_string());

        let scratch_dir = std::env::var("SCRATCH_DIR")
            .unwrap_or_else(|_| std::env::temp_dir().to_string_lossy().into_owned());

        let default_expiry_secs = std::env::var("TEMP_UPLOAD_EXPIRY_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(24 * 60 * 60);

        let prune_on_upload = std::env::var("PRUNE_ON_UPLOAD")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let default_temp_write = match std::env::var("TEMP_WRITE_POLICY")
            .unwrap_or_default()
            .to_lowercase()
            .as_str()
        {
            "validation" => TempWritePolicy::OnValidation,
            "disabled" => TempWritePolicy::Disabled,
            _ => TempWritePolicy::OnRollback,
        };

        let max_upload_size = std::env::var("MAX_UPLOAD_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(50 * 1024 * 1024); // 50MB

        let s3 = S3Config {
            bucket: std::env::var("S3_BUCKET").ok(),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            prefix: std::env::var("S3_PREFIX").unwrap_or_else(|_| "attache".to_string()),
            access_key: std::env::var("S3_ACCESS_KEY").unwrap_or_default(),
            secret_key: std::env::var("S3_SECRET_KEY").unwrap_or_default(),
            endpoint: std::env::var("S3_ENDPOINT").ok(),
        };

        let config = Config {
            environment,
            data_dir,
            storage: StorageConfig {
                backend,
                local_root,
                s3,
            },
            scratch_dir,
            default_expiry_secs,
            prune_on_upload,
            default_temp_write,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.environment.is_empty() {
            return Err(ConfigError::ValidationError(
                "ATTACHE_ENV cannot be empty".to_string(),
            ));
        }

        if matches!(self.storage.backend, StoreKind::S3) && self.storage.s3.bucket.is_none() {
            return Err(ConfigError::ValidationError(
                "S3_BUCKET is required when STORAGE_BACKEND=s3".to_string(),
            ));
        }

        Ok(())
    }
}
