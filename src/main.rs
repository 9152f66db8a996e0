use anyhow::{Context, Result};
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use config::{AppConfig, StoreKind};
use services::{
    blob_client::BlobClient,
    catalog::Catalog,
    gateway_service::GatewayService,
    metadata_store::{MemoryStore, MetadataStore, SqliteStore},
};

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod testing;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting sos-gateway with config: {:?}", cfg);

    // --- Metadata store ---
    let store: Arc<dyn MetadataStore> = match cfg.store {
        StoreKind::Memory => {
            if migrate {
                tracing::info!("In-memory store has no schema; nothing to migrate.");
                return Ok(());
            }
            tracing::warn!("Using the in-memory store; metadata is lost on restart");
            Arc::new(MemoryStore::new())
        }
        StoreKind::Sqlite => {
            let store = open_sqlite(&cfg.database_url).await?;
            if migrate {
                tracing::info!("Database migration complete.");
                return Ok(()); // exit after migration
            }
            Arc::new(store)
        }
    };

    // --- Initialize core service ---
    let blobs = BlobClient::new(
        cfg.blob_addr.clone(),
        cfg.blob_put_addr.clone(),
        cfg.delete_secret.as_str(),
        cfg.connect_timeout,
        cfg.io_timeout,
    );
    let service = GatewayService::new(Catalog::new(store), blobs);

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_object_size, &cfg.cors_allow_origins).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Open the SQLite store, creating its directory if needed, and apply the schema.
async fn open_sqlite(database_url: &str) -> Result<SqliteStore> {
    tracing::debug!("Connecting using raw URL => {}", database_url);

    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {:?}", parent))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let store = SqliteStore::connect(database_url)
        .await
        .with_context(|| format!("opening metadata store at {}", database_url))?;
    store.migrate().await.context("applying schema")?;
    Ok(store)
}
