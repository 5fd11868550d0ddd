use std::sync::Arc;

use crate::config::Config;
use crate::engine::MatchingEngine;
use crate::store::{ParityStore, StoreError};

/// Shared application state injected into the router (§9: constructed
/// explicitly, never kept as process-wide/global state).
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<MatchingEngine<ParityStore>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub async fn new(config: Config) -> Result<Self, StoreError> {
        let store = ParityStore::open(&config.database_url)?;
        let engine = MatchingEngine::new(Arc::new(store));
        Ok(AppState {
            engine: Arc::new(engine),
            config: Arc::new(config),
        })
    }
}
