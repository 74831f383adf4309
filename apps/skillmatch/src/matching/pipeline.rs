//! Matching pipeline: composes extraction, embedding, clustering and ranking
//! into the two flows the application calls:
//!
//! - `on_profile_or_project_changed`: text → terms → vector → cluster id
//! - `recommend` / `recommend_for`: stored vectors → cluster filter → ranking
//!
//! The engine holds no entity state. Its only mutable state is one cluster
//! model slot per population, replaced wholesale by `refit`: readers clone the
//! current `Arc<ClusterModel>` and keep a complete snapshot even while a new
//! model is being published.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::matching::cluster::{fit, ClusterModel, ClusterSummary, KMeansConfig};
use crate::matching::embedding::EmbeddingResolver;
use crate::matching::error::{MatchError, MatchResult};
use crate::matching::extractor::KeywordExtractor;
use crate::matching::ranker::rank;
use crate::matching::types::{
    Candidate, EmbeddingVector, EntityKind, EntityProfile, RankedMatch, SkillTerm,
};

/// Tunables for the orchestrator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// k for the project population.
    pub project_clusters: usize,
    /// k for the job-seeker population.
    pub candidate_clusters: usize,
    pub kmeans: KMeansConfig,
    /// A query's cluster must hold at least this many rankable candidates
    /// (non-zero vector, not the query itself), otherwise the full pool is
    /// ranked.
    pub min_cluster_candidates: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            project_clusters: 8,
            candidate_clusters: 4,
            kmeans: KMeansConfig::default(),
            min_cluster_candidates: 3,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> MatchResult<()> {
        if self.project_clusters == 0 || self.candidate_clusters == 0 {
            return Err(MatchError::config("cluster counts must be > 0"));
        }
        KMeansConfig::new(self.kmeans.max_iterations, self.kmeans.seed).map(|_| ())
    }

    pub fn clusters_for(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::JobSeeker => self.candidate_clusters,
            EntityKind::Project => self.project_clusters,
        }
    }
}

/// Why `recommend` ranked the full pool instead of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// The query has no cluster id (no model yet, or never assigned).
    ColdStart,
    /// The query's cluster holds fewer than `min_cluster_candidates`.
    UndersizedCluster,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub matches: Vec<RankedMatch>,
    /// Cluster the ranking was restricted to, if any.
    pub cluster_id: Option<usize>,
    pub fallback: Option<FallbackReason>,
}

impl Recommendation {
    fn empty() -> Self {
        Self {
            matches: Vec::new(),
            cluster_id: None,
            fallback: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterAssignment {
    pub id: String,
    pub cluster_id: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RefitOutcome {
    /// A new model was fitted and published.
    Fitted {
        summary: ClusterSummary,
        /// One entry per entity that had a vector.
        assignments: Vec<ClusterAssignment>,
        /// Entities left out because their vector is EMPTY.
        excluded: usize,
    },
    /// Population smaller than the configured k; the current model is kept.
    Skipped { population: usize, k: usize },
}

/// Atomically replaceable model slot.
#[derive(Debug, Default)]
struct ModelSlot(RwLock<Option<Arc<ClusterModel>>>);

impl ModelSlot {
    fn snapshot(&self) -> Option<Arc<ClusterModel>> {
        self.0.read().clone()
    }

    fn publish(&self, model: Arc<ClusterModel>) {
        *self.0.write() = Some(model);
    }
}

pub struct MatchingEngine {
    extractor: KeywordExtractor,
    resolver: EmbeddingResolver,
    config: EngineConfig,
    job_seekers: ModelSlot,
    projects: ModelSlot,
    /// Serializes `refit`; `fit` itself is not reentrant per population.
    fit_lock: Mutex<()>,
}

impl MatchingEngine {
    pub fn new(
        extractor: KeywordExtractor,
        resolver: EmbeddingResolver,
        config: EngineConfig,
    ) -> MatchResult<Self> {
        config.validate()?;
        Ok(Self {
            extractor,
            resolver,
            config,
            job_seekers: ModelSlot::default(),
            projects: ModelSlot::default(),
            fit_lock: Mutex::new(()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dimension(&self) -> usize {
        self.resolver.dimension()
    }

    fn slot(&self, kind: EntityKind) -> &ModelSlot {
        match kind {
            EntityKind::JobSeeker => &self.job_seekers,
            EntityKind::Project => &self.projects,
        }
    }

    pub fn extract(&self, text: &str) -> BTreeSet<SkillTerm> {
        self.extractor.extract(text)
    }

    pub fn vectorize<'a, I>(&self, terms: I) -> Option<EmbeddingVector>
    where
        I: IntoIterator<Item = &'a SkillTerm>,
    {
        self.resolver.vectorize(terms)
    }

    /// Current model for a population, or `None` before the first fit.
    pub fn cluster_model(&self, kind: EntityKind) -> Option<Arc<ClusterModel>> {
        self.slot(kind).snapshot()
    }

    /// Recomputes an entity's terms, vector and (if a model exists) cluster id
    /// after its skill text changed. The caller persists the result.
    pub fn on_profile_or_project_changed(
        &self,
        id: impl Into<String>,
        kind: EntityKind,
        text: &str,
    ) -> EntityProfile {
        let id = id.into();
        let terms = self.extract(text);
        let vector = self.vectorize(&terms);
        let cluster_id = match (&vector, self.cluster_model(kind)) {
            (Some(v), Some(model)) => Some(model.assign(v)),
            _ => None,
        };

        debug!(
            %id,
            %kind,
            terms = terms.len(),
            has_vector = vector.is_some(),
            ?cluster_id,
            "entity vectorized"
        );

        EntityProfile {
            id,
            kind,
            terms: terms.into_iter().collect(),
            vector,
            cluster_id,
        }
    }

    /// Fits a fresh model for `kind` over every member of `population` that
    /// has a vector, publishes it, and returns each member's cluster id.
    ///
    /// With `k = None` the configured k is used and an undersized population
    /// is skipped (the previous model stays). An explicit `k` is validated
    /// strictly and fails with `CONFIG_ERROR` when out of range.
    pub fn refit(
        &self,
        kind: EntityKind,
        population: &[Candidate],
        k: Option<usize>,
    ) -> MatchResult<RefitOutcome> {
        let members: Vec<(&str, &EmbeddingVector)> = population
            .iter()
            .filter_map(|c| c.vector.as_ref().map(|v| (c.id.as_str(), v)))
            .collect();
        let excluded = population.len() - members.len();

        let k = match k {
            Some(k) => k,
            None => {
                let k = self.config.clusters_for(kind);
                if members.len() < k {
                    info!(%kind, population = members.len(), k, "population below k; skipping fit");
                    return Ok(RefitOutcome::Skipped {
                        population: members.len(),
                        k,
                    });
                }
                k
            }
        };

        let vectors: Vec<EmbeddingVector> = members.iter().map(|(_, v)| (*v).clone()).collect();

        // Held through publish so the last fit to finish is the one readers see.
        let guard = self.fit_lock.lock();
        let model = fit(&vectors, k, &self.config.kmeans)?;

        let assignments = members
            .iter()
            .zip(model.assignments())
            .map(|((id, _), &cluster_id)| ClusterAssignment {
                id: (*id).to_string(),
                cluster_id,
            })
            .collect();
        let summary = model.summary();

        self.slot(kind).publish(Arc::new(model));
        drop(guard);
        info!(
            %kind,
            k,
            population = members.len(),
            excluded,
            iterations = summary.iterations,
            converged = summary.converged,
            "cluster model published"
        );

        Ok(RefitOutcome::Fitted {
            summary,
            assignments,
            excluded,
        })
    }

    /// Ranks `pool` against `query`, restricted to the query's cluster when it
    /// has one with enough candidates; otherwise ranks the whole pool.
    pub fn recommend(
        &self,
        query: &Candidate,
        pool: &[Candidate],
        limit: Option<usize>,
    ) -> Recommendation {
        let Some(query_vector) = &query.vector else {
            debug!(id = %query.id, "query has no vector; nothing to rank");
            return Recommendation::empty();
        };

        let rankable = || {
            pool.iter()
                .filter_map(|c| c.vector.as_ref().map(|v| (c, v)))
        };

        let (cluster_id, fallback) = match query.cluster_id {
            None => (None, Some(FallbackReason::ColdStart)),
            Some(cluster) => {
                // The query's own record and zero-norm vectors never count
                // towards the cluster floor.
                let members = rankable()
                    .filter(|(c, v)| {
                        c.cluster_id == Some(cluster) && c.id != query.id && v.has_norm()
                    })
                    .count();
                if members >= self.config.min_cluster_candidates {
                    (Some(cluster), None)
                } else {
                    (None, Some(FallbackReason::UndersizedCluster))
                }
            }
        };

        if let Some(reason) = fallback {
            info!(id = %query.id, ?reason, pool = pool.len(), "ranking against full candidate pool");
        }

        let mut matches = rank(
            query_vector,
            rankable()
                .filter(|(c, _)| cluster_id.is_none() || c.cluster_id == cluster_id)
                .map(|(c, v)| (c.id.as_str(), v)),
        );
        if let Some(limit) = limit {
            matches.truncate(limit);
        }

        Recommendation {
            matches,
            cluster_id,
            fallback,
        }
    }

    /// Cross-population recommendation: places `query` in the
    /// `candidate_kind` model's nearest cluster by cosine similarity to the
    /// centroids, then ranks as [`recommend`](Self::recommend).
    pub fn recommend_for(
        &self,
        candidate_kind: EntityKind,
        query_id: &str,
        query_vector: Option<&EmbeddingVector>,
        pool: &[Candidate],
        limit: Option<usize>,
    ) -> Recommendation {
        let cluster_id = query_vector.and_then(|v| {
            self.cluster_model(candidate_kind)
                .and_then(|model| model.nearest_by_cosine(v))
        });
        let query = Candidate {
            id: query_id.to_string(),
            vector: query_vector.cloned(),
            cluster_id,
        };
        self.recommend(&query, pool, limit)
    }
}
