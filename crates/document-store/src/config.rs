//! Store configuration loaded from environment variables.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use crate::{DocumentStore, DocumentStoreError, InMemoryDocumentStore, PostgresDocumentStore, Result};

/// Which backend [`connect`] builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StoreBackend {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(StoreBackend::Memory),
            "postgres" | "postgresql" => Ok(StoreBackend::Postgres),
            other => Err(DocumentStoreError::Configuration(format!(
                "unknown document store backend {other:?}"
            ))),
        }
    }
}

/// Document store configuration.
///
/// Reads from environment variables:
/// - `DOCUMENT_STORE` — `memory` or `postgres` (default: `memory`)
/// - `DATABASE_URL` — connection string, required for `postgres`
/// - `DATABASE_MAX_CONNECTIONS` — pool size (default: `5`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl StoreConfig {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let backend = match lookup("DOCUMENT_STORE") {
            Some(value) => value.parse()?,
            None => StoreBackend::default(),
        };
        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(value) => value
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| {
                    DocumentStoreError::Configuration(format!(
                        "DATABASE_MAX_CONNECTIONS must be a positive integer, got {value:?}"
                    ))
                })?,
            None => 5,
        };

        Ok(Self {
            backend,
            database_url: lookup("DATABASE_URL"),
            max_connections,
        })
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            database_url: None,
            max_connections: 5,
        }
    }
}

/// Builds the configured store as a shared handle.
///
/// The PostgreSQL backend runs pending migrations before returning.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn DocumentStore>> {
    match config.backend {
        StoreBackend::Memory => {
            tracing::info!("using in-memory document store");
            Ok(Arc::new(InMemoryDocumentStore::new()))
        }
        StoreBackend::Postgres => {
            let url = config.database_url.as_deref().ok_or_else(|| {
                DocumentStoreError::Configuration(
                    "DATABASE_URL is required for the postgres backend".to_string(),
                )
            })?;
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(url)
                .await?;
            let store = PostgresDocumentStore::new(pool);
            store.run_migrations().await?;
            tracing::info!(max_connections = config.max_connections, "using postgres document store");
            Ok(Arc::new(store))
        }
    }
}
