use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::matching::cluster::ClusterSummary;
use crate::matching::pipeline::{Recommendation, RefitOutcome};
use crate::matching::types::{Candidate, EmbeddingVector, EntityKind, EntityProfile, SkillTerm};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ExtractRequest {
    pub text: String,
}

#[derive(Serialize, Deserialize)]
pub struct ExtractResponse {
    pub terms: Vec<SkillTerm>,
}

#[derive(Deserialize)]
pub struct VectorizeRequest {
    /// Skill names; multi-word names are treated as compounds.
    pub terms: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct VectorizeResponse {
    /// `null` when no term could be embedded.
    pub vector: Option<EmbeddingVector>,
    pub dimension: usize,
}

#[derive(Deserialize)]
pub struct EntityChangedRequest {
    pub id: String,
    pub kind: EntityKind,
    pub text: String,
}

#[derive(Deserialize)]
pub struct FitRequest {
    pub population: Vec<Candidate>,
    /// Overrides the configured k; validated strictly.
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Deserialize)]
pub struct RecommendRequest {
    pub query: Candidate,
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Deserialize)]
pub struct CrossRecommendRequest {
    pub query_id: String,
    #[serde(default)]
    pub query_vector: Option<EmbeddingVector>,
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn parse_kind(raw: &str) -> Result<EntityKind, AppError> {
    raw.parse::<EntityKind>()
        .map_err(|_| AppError::Validation(format!("unknown entity kind '{raw}'")))
}

/// POST /api/v1/extract
pub async fn handle_extract(
    State(state): State<AppState>,
    Json(req): Json<ExtractRequest>,
) -> Json<ExtractResponse> {
    let terms = state.engine.extract(&req.text).into_iter().collect();
    Json(ExtractResponse { terms })
}

/// POST /api/v1/vectorize
pub async fn handle_vectorize(
    State(state): State<AppState>,
    Json(req): Json<VectorizeRequest>,
) -> Json<VectorizeResponse> {
    let terms: Vec<SkillTerm> = req
        .terms
        .iter()
        .filter_map(|t| SkillTerm::from_phrase(t))
        .collect();
    Json(VectorizeResponse {
        vector: state.engine.vectorize(&terms),
        dimension: state.engine.dimension(),
    })
}

/// POST /api/v1/entities/changed
pub async fn handle_entity_changed(
    State(state): State<AppState>,
    Json(req): Json<EntityChangedRequest>,
) -> Json<EntityProfile> {
    Json(
        state
            .engine
            .on_profile_or_project_changed(req.id, req.kind, &req.text),
    )
}

/// POST /api/v1/clusters/:kind/fit
pub async fn handle_fit(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(req): Json<FitRequest>,
) -> Result<Json<RefitOutcome>, AppError> {
    let kind = parse_kind(&kind)?;
    let engine = state.engine.clone();

    // CPU-bound; keep it off the async workers.
    let outcome = tokio::task::spawn_blocking(move || engine.refit(kind, &req.population, req.k))
        .await
        .map_err(|e| AppError::Internal(anyhow::anyhow!("fit task failed: {e}")))??;

    Ok(Json(outcome))
}

/// GET /api/v1/clusters/:kind
pub async fn handle_get_clusters(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Json<ClusterSummary>, AppError> {
    let kind = parse_kind(&kind)?;
    let model = state
        .engine
        .cluster_model(kind)
        .ok_or_else(|| AppError::NotFound(format!("no cluster model fitted for {kind}")))?;
    Ok(Json(model.summary()))
}

/// POST /api/v1/recommend
pub async fn handle_recommend(
    State(state): State<AppState>,
    Json(req): Json<RecommendRequest>,
) -> Json<Recommendation> {
    Json(state.engine.recommend(&req.query, &req.candidates, req.limit))
}

/// POST /api/v1/recommend/:kind
/// Ranks candidates of `kind` for a query from the other population.
pub async fn handle_recommend_for(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(req): Json<CrossRecommendRequest>,
) -> Result<Json<Recommendation>, AppError> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.engine.recommend_for(
        kind,
        &req.query_id,
        req.query_vector.as_ref(),
        &req.candidates,
        req.limit,
    )))
}
