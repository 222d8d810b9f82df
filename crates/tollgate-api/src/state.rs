//! Application state wiring all gateway services together.
//!
//! AppState holds the fully wired `Gateway` pinned to the concrete infra
//! implementations (SQLite conversation repository, catalog pricing, HTTP
//! adapter factory).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tollgate_core::dispatch::Gateway;
use tollgate_infra::config::load_config;
use tollgate_infra::pricing::CatalogPricing;
use tollgate_infra::providers::adapter_factory;
use tollgate_infra::sqlite::conversation::SqliteConversationRepository;
use tollgate_infra::sqlite::pool::DatabasePool;
use tollgate_types::provider::ProviderKind;

/// Gateway pinned to the SQLite conversation repository.
pub type ConcreteGateway = Gateway<SqliteConversationRepository>;

/// Shared application state holding the wired gateway.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ConcreteGateway>,
}

impl AppState {
    /// Initialize the application state: load config, connect to the
    /// database, wire the gateway.
    pub async fn init(config_path: &Path) -> anyhow::Result<Self> {
        let config = load_config(config_path);

        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir).await?;

        let db_url = format!(
            "sqlite://{}?mode=rwc",
            data_dir.join("tollgate.db").display()
        );
        let db_pool = DatabasePool::new(&db_url).await?;

        let repo = Arc::new(SqliteConversationRepository::new(db_pool));

        // Local providers (Ollama) have no per-token price; everything
        // else goes through the catalog with config overrides on top.
        let free_providers: Vec<String> = config
            .providers
            .iter()
            .filter(|p| matches!(p.kind, ProviderKind::Ollama))
            .map(|p| p.name.clone())
            .collect();
        let pricing = Arc::new(CatalogPricing::new(config.pricing.clone(), free_providers));

        let gateway = Gateway::new(config, adapter_factory(), pricing, repo);

        Ok(Self {
            gateway: Arc::new(gateway),
        })
    }
}

/// Data directory from `TOLLGATE_DATA_DIR`, falling back to `~/.tollgate`.
pub fn resolve_data_dir() -> PathBuf {
    match std::env::var("TOLLGATE_DATA_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(_) => {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".tollgate")
        }
    }
}
