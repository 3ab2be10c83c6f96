//! Keyledger API
//!
//! HTTP interface to the key inventory: KeyType and CryptoKey CRUD,
//! lifecycle operations, history and on-demand expiry sweeps. The two
//! binaries (`keyledger-api`, `keyledger-sweep`) share the setup helpers
//! below.

pub mod config;
pub mod error;
pub mod params;
pub mod routes;

use anyhow::Context;
use keyledger_store::{
    AuditSink, ExpirySweeper, FileAuditSink, InMemoryStore, IntegrityChainSink, Ledger,
    LedgerResult, SqliteStore, Store, TracingAuditSink,
};
use std::sync::Arc;

pub use config::{Config, ConfigError, LogFormat};
pub use error::ApiError;
pub use routes::router;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub ledger: Ledger,
    pub store: Arc<dyn Store>,
    pub sweeper: Arc<ExpirySweeper>,
}

pub type Shared = Arc<AppState>;

impl AppState {
    pub fn new(ledger: Ledger, store: Arc<dyn Store>, sweeper: Arc<ExpirySweeper>) -> Shared {
        Arc::new(Self {
            ledger,
            store,
            sweeper,
        })
    }

    /// Run a ledger call on the blocking pool. Store backends do synchronous I/O.
    pub async fn blocking<T, F>(self: &Arc<Self>, f: F) -> Result<T, ApiError>
    where
        T: Send + 'static,
        F: FnOnce(&Ledger, &dyn Store) -> LedgerResult<T> + Send + 'static,
    {
        let state = Arc::clone(self);
        tokio::task::spawn_blocking(move || f(&state.ledger, state.store.as_ref()))
            .await
            .map_err(|e| ApiError::Internal(format!("blocking task failed: {}", e)))?
            .map_err(ApiError::from)
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

pub fn init_tracing(format: LogFormat) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "keyledger_api=info,keyledger_store=info,tower_http=info".into());
    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }
}

pub fn open_store(config: &Config) -> anyhow::Result<Arc<dyn Store>> {
    if config.is_in_memory() {
        tracing::warn!("using in-memory store; data is lost on exit");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    let store = SqliteStore::open(&config.database)
        .with_context(|| format!("opening database {}", config.database))?;
    tracing::info!(database = %config.database, "opened database");
    Ok(Arc::new(store))
}

pub fn audit_sink(config: &Config) -> Arc<dyn AuditSink> {
    match &config.audit_log {
        Some(path) => {
            tracing::info!(path = %path.display(), "writing hash-chained audit log");
            Arc::new(IntegrityChainSink::new(Arc::new(FileAuditSink::new(path))))
        }
        None => Arc::new(TracingAuditSink),
    }
}

pub fn build_ledger(config: &Config) -> Ledger {
    Ledger::new(audit_sink(config)).with_policy(config.lifecycle_policy())
}

/// Store, ledger and sweeper wired from `config`.
pub fn build_state(config: &Config) -> anyhow::Result<Shared> {
    let store = open_store(config)?;
    let ledger = build_ledger(config);
    let sweeper = Arc::new(ExpirySweeper::new(
        ledger.clone(),
        Arc::clone(&store),
        config.sweeper_config(),
    ));
    Ok(AppState::new(ledger, store, sweeper))
}
