use std::sync::Arc;

use crate::config::Config;
use crate::matching::pipeline::MatchingEngine;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Embedding weights and cluster models live here, loaded once at startup.
    pub engine: Arc<MatchingEngine>,
    pub config: Config,
}
