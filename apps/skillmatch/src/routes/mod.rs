pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::matching::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Extraction & vectorization
        .route("/api/v1/extract", post(handlers::handle_extract))
        .route("/api/v1/vectorize", post(handlers::handle_vectorize))
        .route(
            "/api/v1/entities/changed",
            post(handlers::handle_entity_changed),
        )
        // Clustering
        .route("/api/v1/clusters/:kind", get(handlers::handle_get_clusters))
        .route("/api/v1/clusters/:kind/fit", post(handlers::handle_fit))
        // Ranking
        .route("/api/v1/recommend", post(handlers::handle_recommend))
        .route(
            "/api/v1/recommend/:kind",
            post(handlers::handle_recommend_for),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::matching::pipeline::tests::engine_with;
    use crate::matching::pipeline::EngineConfig;

    fn test_state() -> AppState {
        let engine = engine_with(EngineConfig {
            project_clusters: 2,
            candidate_clusters: 2,
            min_cluster_candidates: 1,
            ..EngineConfig::default()
        });
        AppState {
            engine: Arc::new(engine),
            config: Config {
                embedding_model_path: PathBuf::from("/models/toy.vec"),
                phrase_dictionary_path: None,
                stop_words_path: None,
                project_clusters: 2,
                candidate_clusters: 2,
                kmeans_max_iterations: 300,
                kmeans_seed: 0,
                min_cluster_candidates: 1,
                port: 0,
                rust_log: "info".to_string(),
            },
        }
    }

    async fn send(router: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(b) => Body::from(b.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    fn population() -> Value {
        json!([
            {"id": "p1", "vector": [1.0, 0.0, 0.0]},
            {"id": "p2", "vector": [0.9, 0.1, 0.0]},
            {"id": "p3", "vector": [0.0, 1.0, 0.0]},
            {"id": "p4", "vector": [0.1, 0.9, 0.0]},
            {"id": "p5"}
        ])
    }

    #[tokio::test]
    async fn test_health_reports_cold_start() {
        let (status, body) = send(build_router(test_state()), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["embedding_dimension"], 3);
        assert!(body["clusters"]["project"]["fitted_k"].is_null());
        assert_eq!(body["clusters"]["job_seeker"]["configured_k"], 2);
    }

    #[tokio::test]
    async fn test_extract_endpoint() {
        let (status, body) = send(
            build_router(test_state()),
            "POST",
            "/api/v1/extract",
            Some(json!({"text": "Python, FastAPI and machine learning"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["terms"], json!(["fastapi", "machine_learning", "python"]));
    }

    #[tokio::test]
    async fn test_vectorize_endpoint_empty_is_null() {
        let router = build_router(test_state());
        let (status, body) = send(
            router.clone(),
            "POST",
            "/api/v1/vectorize",
            Some(json!({"terms": []})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["vector"].is_null());

        let (_, body) = send(
            router,
            "POST",
            "/api/v1/vectorize",
            Some(json!({"terms": ["Rust"]})),
        )
        .await;
        assert_eq!(body["vector"], json!([0.0, 1.0, 0.0]));
        assert_eq!(body["dimension"], 3);
    }

    #[tokio::test]
    async fn test_vectorize_multi_word_term_resolves_as_compound() {
        let (status, body) = send(
            build_router(test_state()),
            "POST",
            "/api/v1/vectorize",
            Some(json!({"terms": ["Machine Learning"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["vector"], json!([0.0, 0.25, 0.75]));
    }

    #[tokio::test]
    async fn test_fit_then_entity_changed_assigns_cluster() {
        let router = build_router(test_state());
        let (status, body) = send(
            router.clone(),
            "POST",
            "/api/v1/clusters/projects/fit",
            Some(json!({"population": population()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "fitted");
        assert_eq!(body["excluded"], 1);
        assert_eq!(body["assignments"].as_array().unwrap().len(), 4);

        let (status, body) = send(router.clone(), "GET", "/api/v1/clusters/project", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["k"], 2);

        let (status, body) = send(
            router,
            "POST",
            "/api/v1/entities/changed",
            Some(json!({"id": "p9", "kind": "PROJECT", "text": "Python"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["terms"], json!(["python"]));
        assert!(body["cluster_id"].is_u64());
    }

    #[tokio::test]
    async fn test_fit_with_oversized_k_is_config_error() {
        let (status, body) = send(
            build_router(test_state()),
            "POST",
            "/api/v1/clusters/job_seeker/fit",
            Some(json!({"population": population(), "k": 9})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_unknown_kind_is_validation_error() {
        let (status, body) =
            send(build_router(test_state()), "GET", "/api/v1/clusters/companies", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_clusters_before_fit_is_not_found() {
        let (status, body) =
            send(build_router(test_state()), "GET", "/api/v1/clusters/project", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_recommend_cold_start_ranks_full_pool() {
        let (status, body) = send(
            build_router(test_state()),
            "POST",
            "/api/v1/recommend",
            Some(json!({
                "query": {"id": "s1", "vector": [1.0, 0.0, 0.0]},
                "candidates": population(),
                "limit": 3
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fallback"], "cold_start");
        let matches = body["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 3);
        assert_eq!(matches[0]["id"], "p1");
        assert_eq!(matches[1]["id"], "p2");
    }

    #[tokio::test]
    async fn test_recommend_for_other_population() {
        let router = build_router(test_state());
        let (_, fitted) = send(
            router.clone(),
            "POST",
            "/api/v1/clusters/project/fit",
            Some(json!({"population": population()})),
        )
        .await;

        let mut pool = population();
        for candidate in pool.as_array_mut().unwrap() {
            let assigned = fitted["assignments"]
                .as_array()
                .unwrap()
                .iter()
                .find(|a| a["id"] == candidate["id"])
                .map(|a| a["cluster_id"].clone());
            if let Some(cluster_id) = assigned {
                candidate["cluster_id"] = cluster_id;
            }
        }
        let p3_cluster = pool[2]["cluster_id"].clone();

        let (status, body) = send(
            router,
            "POST",
            "/api/v1/recommend/project",
            Some(json!({
                "query_id": "s1",
                "query_vector": [0.0, 1.0, 0.0],
                "candidates": pool
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cluster_id"], p3_cluster);
        assert!(body["fallback"].is_null());
        assert_eq!(body["matches"].as_array().unwrap().len(), 2);
        assert_eq!(body["matches"][0]["id"], "p3");
    }

    #[tokio::test]
    async fn test_invalid_vector_payload_rejected() {
        let (status, _) = send(
            build_router(test_state()),
            "POST",
            "/api/v1/recommend",
            Some(json!({
                "query": {"id": "s1", "vector": []},
                "candidates": []
            })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }
}
