use std::time::Duration;

use thiserror::Error;

/// Longest TTL S3-compatible stores accept for a presigned URL.
const MAX_PRESIGN_TTL_SECONDS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub storage: StorageConfig,
    pub media: MediaConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Externally reachable base URL, used for locally signed media URLs.
    pub public_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
    /// HMAC secret for locally signed URLs
    pub url_signing_secret: String,
    /// S3-compatible endpoint (required when backend is s3)
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_access_key_id: Option<String>,
    pub s3_secret_access_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MediaConfig {
    /// Bucket holding every album's media objects
    pub bucket: String,
    pub presign_ttl_seconds: u64,
    /// Attempts per object removal during detach (removal is idempotent)
    pub remove_attempts: u32,
    /// Seconds between reconciliation sweeps; 0 disables the background loop
    pub sweep_interval_seconds: u64,
    /// Minimum age of a write intent before the sweep treats its object as orphaned
    pub sweep_grace_seconds: u64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            data_dir: "./data".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
            url_signing_secret: uuid::Uuid::new_v4().to_string(),
            s3_endpoint: None,
            s3_region: "us-east-1".to_string(),
            s3_access_key_id: None,
            s3_secret_access_key: None,
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            bucket: "album-media".to_string(),
            presign_ttl_seconds: 1000,
            remove_attempts: 3,
            sweep_interval_seconds: 300,
            sweep_grace_seconds: 900,
        }
    }
}

impl MediaConfig {
    pub fn presign_ttl(&self) -> Duration {
        Duration::from_secs(self.presign_ttl_seconds)
    }

    pub fn sweep_grace(&self) -> Duration {
        Duration::from_secs(self.sweep_grace_seconds)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_seconds > 0).then(|| Duration::from_secs(self.sweep_interval_seconds))
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        let defaults = MediaConfig::default();

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "./data".to_string());

        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:8080".to_string())
            .trim_end_matches('/')
            .to_string();

        let test_mode = std::env::var("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_upload_size = env_parse("MAX_UPLOAD_SIZE", 50 * 1024 * 1024); // 50MB

        let backend = match std::env::var("STORAGE_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "s3" | "minio" => StorageBackend::S3,
            _ => StorageBackend::Local,
        };

        let local_storage_path =
            std::env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "./files".to_string());

        let url_signing_secret = std::env::var("URL_SIGNING_SECRET").unwrap_or_else(|_| {
            tracing::warn!("URL_SIGNING_SECRET not set; signed URLs will not survive a restart");
            uuid::Uuid::new_v4().to_string()
        });

        let config = Config {
            node: NodeConfig {
                bind_address,
                data_dir,
                public_base_url,
            },
            storage: StorageConfig {
                backend,
                local_storage_path,
                url_signing_secret,
                s3_endpoint: std::env::var("S3_ENDPOINT").ok(),
                s3_region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                s3_access_key_id: std::env::var("S3_ACCESS_KEY_ID").ok(),
                s3_secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY").ok(),
            },
            media: MediaConfig {
                bucket: std::env::var("MEDIA_BUCKET").unwrap_or(defaults.bucket),
                presign_ttl_seconds: env_parse("PRESIGN_TTL_SECONDS", defaults.presign_ttl_seconds),
                remove_attempts: env_parse("REMOVE_ATTEMPTS", defaults.remove_attempts),
                sweep_interval_seconds: env_parse(
                    "SWEEP_INTERVAL_SECONDS",
                    defaults.sweep_interval_seconds,
                ),
                sweep_grace_seconds: env_parse("SWEEP_GRACE_SECONDS", defaults.sweep_grace_seconds),
            },
            test_mode,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_bucket_name(&self.media.bucket)?;

        if self.media.presign_ttl_seconds == 0
            || self.media.presign_ttl_seconds > MAX_PRESIGN_TTL_SECONDS
        {
            return Err(ConfigError::ValidationError(format!(
                "PRESIGN_TTL_SECONDS must be between 1 and {MAX_PRESIGN_TTL_SECONDS}"
            )));
        }

        if self.media.remove_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "REMOVE_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        if self.storage.backend == StorageBackend::S3 {
            if self.storage.s3_endpoint.is_none() {
                return Err(ConfigError::ValidationError(
                    "S3_ENDPOINT is required when STORAGE_BACKEND=s3".to_string(),
                ));
            }
            if self.storage.s3_access_key_id.is_none() || self.storage.s3_secret_access_key.is_none()
            {
                return Err(ConfigError::ValidationError(
                    "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY are required when STORAGE_BACKEND=s3"
                        .to_string(),
                ));
            }
        }

        if self.storage.url_signing_secret.is_empty() {
            return Err(ConfigError::ValidationError(
                "URL_SIGNING_SECRET cannot be empty".to_string(),
            ));
        }

        if self.media.sweep_interval_seconds > 0
            && self.media.sweep_grace_seconds < self.media.presign_ttl_seconds.min(60)
        {
            tracing::warn!(
                grace = self.media.sweep_grace_seconds,
                "Sweep grace window is very short; slow uploads may be reclaimed mid-flight"
            );
        }

        Ok(())
    }
}

/// Bucket names follow the S3 rules: 3-63 chars of lowercase letters, digits, '-' and '.',
/// starting and ending with a letter or digit.
pub fn validate_bucket_name(name: &str) -> Result<(), ConfigError> {
    let valid_len = (3..=63).contains(&name.len());
    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'.');
    let valid_edges = name
        .bytes()
        .next()
        .zip(name.bytes().last())
        .is_some_and(|(first, last)| first.is_ascii_alphanumeric() && last.is_ascii_alphanumeric());

    if valid_len && valid_chars && valid_edges {
        Ok(())
    } else {
        Err(ConfigError::ValidationError(format!(
            "MEDIA_BUCKET '{name}' is not a valid bucket name"
        )))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
