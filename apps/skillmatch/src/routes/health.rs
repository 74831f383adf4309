use axum::{extract::State, Json};
use serde_json::{json, Value};

use crate::matching::types::EntityKind;
use crate::state::AppState;

/// GET /health
/// Returns service status plus embedding and cluster model readiness.
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    let clusters: serde_json::Map<String, Value> = EntityKind::ALL
        .iter()
        .map(|&kind| {
            let fitted = state.engine.cluster_model(kind).map(|m| m.k());
            (
                kind.to_string(),
                json!({
                    "configured_k": state.engine.config().clusters_for(kind),
                    "fitted_k": fitted,
                }),
            )
        })
        .collect();

    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "skillmatch",
        "embedding_dimension": state.engine.dimension(),
        "embedding_model": state.config.embedding_model_path.display().to_string(),
        "clusters": clusters,
    }))
}
