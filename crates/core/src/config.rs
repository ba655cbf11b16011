//! Configuration types shared across crates.

use crate::password::PasswordHasher;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Enable the /metrics endpoint for Prometheus scraping (default: true).
    /// SECURITY: When enabled, restrict the endpoint to scraper IPs at the
    /// infrastructure level.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
    /// Maximum accepted upload size in bytes (0 = unlimited).
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
    /// Directory for per-request staging files.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_max_upload_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./data/staging")
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            metrics_enabled: default_metrics_enabled(),
            max_upload_bytes: default_max_upload_bytes(),
            staging_dir: default_staging_dir(),
        }
    }
}

/// Shared file settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilesConfig {
    /// Container (bucket or directory) holding uploaded objects.
    #[serde(default = "default_container")]
    pub container: String,
    /// Lifetime applied when an upload does not ask for a usable one.
    #[serde(default = "default_expiration_days")]
    pub default_expiration_days: u32,
}

fn default_container() -> String {
    crate::DEFAULT_CONTAINER.to_string()
}

fn default_expiration_days() -> u32 {
    crate::DEFAULT_EXPIRATION_DAYS
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            container: default_container(),
            default_expiration_days: default_expiration_days(),
        }
    }
}

impl FilesConfig {
    /// Default lifetime as a Duration.
    pub fn default_expiration(&self) -> Duration {
        Duration::days(i64::from(self.default_expiration_days))
    }
}

/// Password hashing configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PasswordConfig {
    /// bcrypt work factor.
    #[serde(default = "default_password_cost")]
    pub cost: u32,
}

fn default_password_cost() -> u32 {
    PasswordHasher::DEFAULT_COST
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            cost: default_password_cost(),
        }
    }
}

impl PasswordConfig {
    /// Build the hasher for this configuration.
    pub fn hasher(&self) -> crate::Result<PasswordHasher> {
        PasswordHasher::new(self.cost)
    }
}

/// Admin key configuration.
///
/// Without a token hash the admin endpoints are disabled.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// SHA256 hex of the admin key, optionally prefixed with `sha256:`.
    /// Generate with: `echo -n "your-secret-key" | sha256sum`
    #[serde(default)]
    pub token_hash: Option<String>,
}

impl AdminConfig {
    /// Create a test configuration with a dummy key hash.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            // SHA256 of "test-admin-token"
            token_hash: Some(
                "17d6bfe05d1b1fb7bc499f8e3f639c7b3eda4c40f321eef8887a0c04c89a99c5".to_string(),
            ),
        }
    }

    /// Normalized hex digest, if configured.
    pub fn normalized_hash(&self) -> Option<String> {
        self.token_hash.as_deref().map(|hash| {
            hash.trim()
                .trim_start_matches("sha256:")
                .to_ascii_lowercase()
        })
    }

    pub fn validate(&self) -> Result<(), String> {
        match self.normalized_hash() {
            None => Ok(()),
            Some(hash) if hash.len() == 64 && hash.chars().all(|c| c.is_ascii_hexdigit()) => {
                Ok(())
            }
            Some(_) => Err("admin.token_hash must be a 64 character SHA256 hex digest".to_string()),
        }
    }
}

/// Storage backend configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Local filesystem storage. Containers are directories under `path`.
    Filesystem {
        /// Root directory for storage.
        path: PathBuf,
    },
    /// S3-compatible storage. Containers are buckets.
    S3 {
        /// Optional endpoint URL (for MinIO, etc.).
        endpoint: Option<String>,
        /// AWS region.
        region: Option<String>,
        /// Optional key prefix.
        prefix: Option<String>,
        /// AWS access key ID. Falls back to AWS_ACCESS_KEY_ID env var if not set.
        access_key_id: Option<String>,
        /// AWS secret access key. Falls back to AWS_SECRET_ACCESS_KEY env var if not set.
        secret_access_key: Option<String>,
        /// Force path-style URLs. Required for MinIO and some S3-compatible services.
        #[serde(default)]
        force_path_style: bool,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::Filesystem {
            path: PathBuf::from("./data/storage"),
        }
    }
}

impl StorageConfig {
    /// Validate storage configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            StorageConfig::S3 {
                access_key_id,
                secret_access_key,
                ..
            } => match (access_key_id.as_ref(), secret_access_key.as_ref()) {
                (Some(_), Some(_)) | (None, None) => Ok(()),
                _ => Err(
                    "s3 config requires both access_key_id and secret_access_key when either is set"
                        .to_string(),
                ),
            },
            _ => Ok(()),
        }
    }
}

/// PostgreSQL SSL mode configuration.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PgSslMode {
    Disable,
    #[default]
    Prefer,
    Require,
}

/// Metadata store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MetadataConfig {
    /// SQLite database (small deployments and tests).
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Query timeout in seconds. Advisory only: slow queries are logged,
        /// not cancelled.
        #[serde(default = "default_sqlite_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
    /// PostgreSQL database.
    Postgres {
        /// Connection URL. Takes precedence over individual fields.
        url: Option<String>,
        host: Option<String>,
        #[serde(default = "default_pg_port")]
        port: Option<u16>,
        username: Option<String>,
        /// WARNING: Prefer DROPIT_METADATA__PASSWORD over storing in config.
        password: Option<String>,
        database: Option<String>,
        ssl_mode: Option<PgSslMode>,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        /// Statement timeout in milliseconds.
        #[serde(default = "default_statement_timeout_ms")]
        statement_timeout_ms: Option<u64>,
    },
}

fn default_max_connections() -> u32 {
    10
}

fn default_pg_port() -> Option<u16> {
    Some(5432)
}

fn default_statement_timeout_ms() -> Option<u64> {
    Some(30_000)
}

fn default_sqlite_query_timeout_secs() -> Option<u64> {
    Some(30)
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self::Sqlite {
            path: PathBuf::from("./data/metadata.db"),
            query_timeout_secs: default_sqlite_query_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    /// Validate metadata configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        match self {
            MetadataConfig::Sqlite { .. } => Ok(()),
            MetadataConfig::Postgres {
                url,
                host,
                database,
                ..
            } => match (url.as_ref(), host.as_ref(), database.as_ref()) {
                (Some(_), _, _) => Ok(()),
                (None, Some(_), Some(_)) => Ok(()),
                (None, None, _) => {
                    Err("postgres config requires either 'url' or 'host' + 'database'".to_string())
                }
                (None, Some(_), None) => Err(
                    "postgres config requires 'database' when using individual fields".to_string(),
                ),
            },
        }
    }
}

/// Maintenance sweep configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Run the sweep periodically in the background.
    #[serde(default = "default_sweep_enabled")]
    pub auto_schedule_enabled: bool,
    /// Seconds between background runs.
    #[serde(default = "default_sweep_interval_secs")]
    pub interval_secs: u64,
    /// Records fetched per page.
    #[serde(default = "default_sweep_batch_size")]
    pub batch_size: u32,
    /// How long a self-destruct mark must age before the file is purged.
    /// Lets the final permitted download finish streaming.
    #[serde(default = "default_marked_grace_secs")]
    pub marked_grace_secs: u64,
    /// Report what would be deleted without deleting.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_sweep_batch_size() -> u32 {
    500
}

fn default_marked_grace_secs() -> u64 {
    300
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            auto_schedule_enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval_secs(),
            batch_size: default_sweep_batch_size(),
            marked_grace_secs: default_marked_grace_secs(),
            dry_run: false,
        }
    }
}

impl SweepConfig {
    /// Interval between background runs.
    pub fn interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.interval_secs)
    }

    /// Grace period for marked records.
    pub fn marked_grace(&self) -> Duration {
        Duration::seconds(i64::try_from(self.marked_grace_secs).unwrap_or(i64::MAX))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.auto_schedule_enabled && self.interval_secs == 0 {
            return Err("sweep.interval_secs cannot be 0 when scheduling is enabled".to_string());
        }
        if self.batch_size == 0 {
            return Err("sweep.batch_size must be at least 1".to_string());
        }
        if self.marked_grace_secs > i64::MAX as u64 {
            return Err(format!(
                "sweep.marked_grace_secs {} exceeds maximum value {}",
                self.marked_grace_secs,
                i64::MAX
            ));
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub password: PasswordConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub sweep: SweepConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses the cheapest bcrypt work factor, disables
    /// the background sweep and sets a dummy admin key.
    pub fn for_testing() -> Self {
        Self {
            password: PasswordConfig {
                cost: PasswordHasher::MIN_COST,
            },
            admin: AdminConfig::for_testing(),
            sweep: SweepConfig {
                auto_schedule_enabled: false,
                ..SweepConfig::default()
            },
            ..Self::default()
        }
    }

    /// Check every section, returning the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.files.container.trim().is_empty() {
            return Err("files.container cannot be empty".to_string());
        }
        PasswordHasher::new(self.password.cost).map_err(|e| e.to_string())?;
        self.storage.validate()?;
        self.metadata.validate()?;
        self.admin.validate()?;
        self.sweep.validate()?;
        Ok(())
    }
}
