use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};

use crate::matching::cluster::KMeansConfig;
use crate::matching::pipeline::EngineConfig;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub embedding_model_path: PathBuf,
    pub phrase_dictionary_path: Option<PathBuf>,
    pub stop_words_path: Option<PathBuf>,
    pub project_clusters: usize,
    pub candidate_clusters: usize,
    pub kmeans_max_iterations: usize,
    pub kmeans_seed: u64,
    pub min_cluster_candidates: usize,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let embedding_model_path = lookup("EMBEDDING_MODEL_PATH")
            .map(PathBuf::from)
            .context("Required environment variable 'EMBEDDING_MODEL_PATH' is not set")?;

        let config = Config {
            embedding_model_path,
            phrase_dictionary_path: lookup("PHRASE_DICTIONARY_PATH").map(PathBuf::from),
            stop_words_path: lookup("STOP_WORDS_PATH").map(PathBuf::from),
            project_clusters: parse_or(&lookup, "PROJECT_CLUSTERS", 8)?,
            candidate_clusters: parse_or(&lookup, "CANDIDATE_CLUSTERS", 4)?,
            kmeans_max_iterations: parse_or(&lookup, "KMEANS_MAX_ITERATIONS", 300)?,
            kmeans_seed: parse_or(&lookup, "KMEANS_SEED", 0)?,
            min_cluster_candidates: parse_or(&lookup, "MIN_CLUSTER_CANDIDATES", 3)?,
            port: parse_or(&lookup, "PORT", 8080)?,
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
        };

        if config.project_clusters == 0 || config.candidate_clusters == 0 {
            bail!("PROJECT_CLUSTERS and CANDIDATE_CLUSTERS must be > 0");
        }
        if config.kmeans_max_iterations == 0 {
            bail!("KMEANS_MAX_ITERATIONS must be > 0");
        }
        Ok(config)
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            project_clusters: self.project_clusters,
            candidate_clusters: self.candidate_clusters,
            kmeans: KMeansConfig {
                max_iterations: self.kmeans_max_iterations,
                seed: self.kmeans_seed,
            },
            min_cluster_candidates: self.min_cluster_candidates,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} must be a valid number, got '{raw}'")),
    }
}
