//! Metadata store abstraction and implementations for dropit.
//!
//! This crate owns the `files` table:
//! - File records and their access-control columns
//! - The atomic, limit-checked download counter
//! - Sweep queries for expired and self-destructed files
//! - Read-time upgrade of rows left by the previous service generation

pub mod error;
pub mod legacy;
pub mod models;
pub mod postgres;
pub mod repos;
pub mod store;

pub use error::{MetadataError, MetadataResult};
pub use legacy::LegacyUpgrade;
pub use models::{CURRENT_SCHEMA_VERSION, ConsumeOutcome, FileRow};
pub use postgres::PostgresStore;
pub use repos::FileRepo;
pub use store::{MetadataStore, SqliteStore};

use dropit_core::config::MetadataConfig;
use std::sync::Arc;

/// Create a metadata store from configuration.
pub async fn from_config(
    config: &MetadataConfig,
    legacy: LegacyUpgrade,
) -> MetadataResult<Arc<dyn MetadataStore>> {
    match config {
        MetadataConfig::Sqlite {
            path,
            query_timeout_secs,
        } => {
            let store = SqliteStore::new(path, *query_timeout_secs)
                .await?
                .with_legacy_upgrade(legacy);
            Ok(Arc::new(store) as Arc<dyn MetadataStore>)
        }
        MetadataConfig::Postgres {
            url,
            host,
            port,
            username,
            password,
            database,
            ssl_mode,
            max_connections,
            statement_timeout_ms,
        } => {
            let store = if let Some(url) = url {
                tracing::info!("Connecting to PostgreSQL using connection URL");
                PostgresStore::from_url(url, *max_connections, *statement_timeout_ms).await?
            } else if let (Some(host), Some(database)) = (host.as_ref(), database.as_ref()) {
                PostgresStore::from_params(
                    host,
                    port.unwrap_or(5432),
                    username.as_deref(),
                    password.as_deref(),
                    database,
                    *ssl_mode,
                    *max_connections,
                    *statement_timeout_ms,
                )
                .await?
            } else {
                return Err(MetadataError::Config(
                    "postgres config requires either 'url' or 'host' + 'database'".to_string(),
                ));
            };
            Ok(Arc::new(store.with_legacy_upgrade(legacy)) as Arc<dyn MetadataStore>)
        }
    }
}
