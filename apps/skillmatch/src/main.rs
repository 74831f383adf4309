mod config;
mod errors;
mod matching;
mod routes;
mod state;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::matching::embedding::{EmbeddingModel, EmbeddingResolver, TermEmbeddings};
use crate::matching::extractor::{KeywordExtractor, PhraseDictionary, StopWords};
use crate::matching::pipeline::MatchingEngine;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Skillmatch API v{}", env!("CARGO_PKG_VERSION"));

    // Load embedding weights (blocking file IO, once)
    let model_path = config.embedding_model_path.clone();
    let model = tokio::task::spawn_blocking(move || EmbeddingModel::load(&model_path))
        .await
        .context("embedding loader task panicked")?
        .with_context(|| {
            format!(
                "Failed to load embedding model from {}",
                config.embedding_model_path.display()
            )
        })?;
    info!(
        "Embedding model ready: {} words, dim {}, subwords: {}",
        model.vocab_size(),
        model.dimension(),
        model.has_subwords()
    );

    // Initialize keyword extractor
    let phrases = match &config.phrase_dictionary_path {
        Some(path) => PhraseDictionary::from_file(path)
            .with_context(|| format!("Failed to read phrase dictionary {}", path.display()))?,
        None => PhraseDictionary::builtin(),
    };
    if phrases.is_empty() {
        warn!("Phrase dictionary is empty; multi-word skills will not be merged");
    }
    let stop_words = match &config.stop_words_path {
        Some(path) => StopWords::from_file(path)
            .with_context(|| format!("Failed to read stop words {}", path.display()))?,
        None => StopWords::builtin(),
    };
    info!(
        "Keyword extractor: {} phrases, {} stop words",
        phrases.len(),
        stop_words.len()
    );
    let extractor = KeywordExtractor::new(phrases, stop_words);

    // Build matching engine (cluster models start empty until the first fit)
    let resolver = EmbeddingResolver::new(Arc::new(model));
    let engine = MatchingEngine::new(extractor, resolver, config.engine_config())?;
    info!(
        "Matching engine initialized (project k={}, job seeker k={})",
        config.project_clusters, config.candidate_clusters
    );

    // Build app state
    let state = AppState {
        engine: Arc::new(engine),
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
