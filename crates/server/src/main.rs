//! dropit server binary.

use anyhow::{Context, Result};
use clap::Parser;
use dropit_core::config::AppConfig;
use dropit_metadata::LegacyUpgrade;
use dropit_server::{AppState, create_router};
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// dropit - an ephemeral file-drop server
#[derive(Parser, Debug)]
#[command(name = "dropitd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "DROPIT_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,
}

/// Load configuration from an optional TOML file overlaid with `DROPIT_*`
/// environment variables.
fn load_config(config_path: &str) -> Result<AppConfig> {
    let path = std::path::Path::new(config_path);
    let mut figment = Figment::new();
    let has_config_file = path.exists();

    if has_config_file {
        tracing::info!(config_path = %config_path, "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    } else {
        tracing::debug!("No config file found at {}", config_path);
    }

    // DROPIT_CONFIG is only the path
    let has_env_config =
        std::env::vars().any(|(key, _)| key.starts_with("DROPIT_") && key != "DROPIT_CONFIG");

    if !has_config_file && !has_env_config {
        anyhow::bail!(
            "No configuration provided.\n\n\
             Provide configuration via one of:\n  \
             1. Config file: dropitd --config /path/to/config.toml\n  \
             2. Environment variables: DROPIT_SERVER__BIND=0.0.0.0:8080 \
             DROPIT_STORAGE__TYPE=filesystem DROPIT_STORAGE__PATH=/var/lib/dropit dropitd\n\n\
             Set DROPIT_CONFIG env var to specify a default config file path."
        );
    }

    if !has_config_file {
        tracing::info!("Using environment variables for configuration");
    }

    let config: AppConfig = figment
        .merge(Env::prefixed("DROPIT_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("dropit v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;

    dropit_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = dropit_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    // Fail fast instead of reporting healthy with unreachable storage.
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!("Storage backend connectivity verified");

    let hasher = config
        .password
        .hasher()
        .context("invalid password configuration")?;
    let legacy = LegacyUpgrade::new(hasher, config.files.default_expiration());
    let metadata = dropit_metadata::from_config(&config.metadata, legacy)
        .await
        .context("failed to initialize metadata store")?;
    tracing::info!(backend = metadata.backend_name(), "Metadata store initialized");

    let state = AppState::new(config.clone(), storage, metadata)
        .await
        .context("failed to initialize application state")?;

    if config.sweep.auto_schedule_enabled {
        let _sweep_handle = state
            .sweeper
            .clone()
            .spawn_scheduler(config.sweep.interval());
    } else {
        tracing::info!("Automatic maintenance sweep disabled");
    }

    let app = create_router(state);

    let addr: SocketAddr = config.server.bind.parse().context("invalid bind address")?;
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
