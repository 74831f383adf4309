//! Cluster assigner: k-means over entity vectors.
//!
//! `fit` runs Lloyd's algorithm from a seeded k-means++ initialisation and
//! returns an immutable `ClusterModel`. `assign` is a nearest-centroid lookup
//! (Euclidean, ties → lowest centroid index) against a fitted model.
//!
//! Cluster ids are only meaningful within the model that produced them.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::matching::error::{MatchError, MatchResult};
use crate::matching::ranker::cosine_similarity;
use crate::matching::types::EmbeddingVector;

/// Parameters for one `fit` call. `k` is passed separately because it is
/// chosen per population by the caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KMeansConfig {
    /// Hard cap on Lloyd iterations.
    pub max_iterations: usize,
    /// Seed for k-means++ initialisation.
    pub seed: u64,
}

impl KMeansConfig {
    pub fn new(max_iterations: usize, seed: u64) -> MatchResult<Self> {
        if max_iterations == 0 {
            return Err(MatchError::config("max_iterations must be > 0"));
        }
        Ok(Self {
            max_iterations,
            seed,
        })
    }
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            max_iterations: 300,
            seed: 0,
        }
    }
}

/// A fitted clustering. Never mutated after construction; a refit produces a
/// new value.
#[derive(Debug, Clone)]
pub struct ClusterModel {
    centroids: Vec<Vec<f32>>,
    dimension: usize,
    /// Cluster id of every training vector, in input order.
    assignments: Vec<usize>,
    sizes: Vec<usize>,
    iterations: usize,
    converged: bool,
    inertia: f64,
    fitted_at: DateTime<Utc>,
}

/// Serializable overview of a fitted model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub k: usize,
    pub dimension: usize,
    pub sizes: Vec<usize>,
    pub iterations: usize,
    pub converged: bool,
    pub inertia: f64,
    pub fitted_at: DateTime<Utc>,
}

impl ClusterModel {
    pub fn k(&self) -> usize {
        self.centroids.len()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn centroid(&self, cluster: usize) -> Option<&[f32]> {
        self.centroids.get(cluster).map(Vec::as_slice)
    }

    pub fn assignments(&self) -> &[usize] {
        &self.assignments
    }

    pub fn sizes(&self) -> &[usize] {
        &self.sizes
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn summary(&self) -> ClusterSummary {
        ClusterSummary {
            k: self.k(),
            dimension: self.dimension,
            sizes: self.sizes.clone(),
            iterations: self.iterations,
            converged: self.converged,
            inertia: self.inertia,
            fitted_at: self.fitted_at,
        }
    }

    /// Nearest centroid by Euclidean distance. O(k).
    pub fn assign(&self, vector: &EmbeddingVector) -> usize {
        if vector.dimension() != self.dimension {
            warn!(
                expected = self.dimension,
                actual = vector.dimension(),
                "assigning vector with mismatched dimension"
            );
        }
        nearest_centroid(vector.as_slice(), &self.centroids)
    }

    /// Centroid with the highest cosine similarity to `vector` (ties → lowest
    /// index). Used to place a query from another population into this one.
    /// `None` when the query or every centroid has zero norm.
    pub fn nearest_by_cosine(&self, vector: &EmbeddingVector) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, centroid) in self.centroids.iter().enumerate() {
            let Some(sim) = cosine_similarity(vector.as_slice(), centroid) else {
                continue;
            };
            if best.map_or(true, |(_, s)| sim > s) {
                best = Some((idx, sim));
            }
        }
        best.map(|(idx, _)| idx)
    }
}

/// Free-function form of [`ClusterModel::assign`].
pub fn assign(model: &ClusterModel, vector: &EmbeddingVector) -> usize {
    model.assign(vector)
}

/// Fits `k` centroids to `vectors`.
///
/// # Errors
///
/// `MatchError::Config` when `k == 0` or `k > vectors.len()`;
/// `MatchError::DimensionMismatch` when vectors differ in length.
pub fn fit(vectors: &[EmbeddingVector], k: usize, config: &KMeansConfig) -> MatchResult<ClusterModel> {
    if k == 0 {
        return Err(MatchError::config("k must be > 0"));
    }
    if k > vectors.len() {
        return Err(MatchError::config(format!(
            "k ({k}) must be <= number of vectors ({})",
            vectors.len()
        )));
    }
    if config.max_iterations == 0 {
        return Err(MatchError::config("max_iterations must be > 0"));
    }
    let dimension = vectors[0].dimension();
    if let Some(bad) = vectors.iter().find(|v| v.dimension() != dimension) {
        return Err(MatchError::DimensionMismatch {
            expected: dimension,
            actual: bad.dimension(),
        });
    }

    let points: Vec<&[f32]> = vectors.iter().map(EmbeddingVector::as_slice).collect();
    let mut centroids = kmeans_plus_plus_init(&points, k, config.seed);

    let mut assignments = vec![usize::MAX; points.len()];
    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        let mut changed = false;
        for (slot, point) in assignments.iter_mut().zip(&points) {
            let nearest = nearest_centroid(point, &centroids);
            if *slot != nearest {
                *slot = nearest;
                changed = true;
            }
        }

        if !changed {
            converged = true;
            break;
        }

        centroids = recompute_centroids(&points, &assignments, &centroids);
    }

    if !converged {
        // Keep training labels consistent with the published centroids.
        for (slot, point) in assignments.iter_mut().zip(&points) {
            *slot = nearest_centroid(point, &centroids);
        }
    }

    let mut sizes = vec![0usize; k];
    for &cluster in &assignments {
        sizes[cluster] += 1;
    }
    let inertia: f64 = points
        .iter()
        .zip(&assignments)
        .map(|(p, &c)| squared_distance(p, &centroids[c]))
        .sum();

    info!(
        k,
        n = points.len(),
        dimension,
        iterations,
        converged,
        inertia,
        ?sizes,
        "k-means fit complete"
    );

    Ok(ClusterModel {
        centroids,
        dimension,
        assignments,
        sizes,
        iterations,
        converged,
        inertia,
        fitted_at: Utc::now(),
    })
}

// ────────────────────────────────────────────────────────────────────────────
// Helpers
// ────────────────────────────────────────────────────────────────────────────

fn squared_distance(a: &[f32], b: &[f32]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = f64::from(x) - f64::from(y);
            d * d
        })
        .sum()
}

/// Strict `<` keeps the lowest index on ties.
fn nearest_centroid(point: &[f32], centroids: &[Vec<f32>]) -> usize {
    let mut best = 0;
    let mut best_dist = f64::INFINITY;
    for (idx, centroid) in centroids.iter().enumerate() {
        let dist = squared_distance(point, centroid);
        if dist < best_dist {
            best_dist = dist;
            best = idx;
        }
    }
    best
}

/// k-means++: first centroid uniform, then each next one sampled with
/// probability proportional to squared distance from the chosen set. When
/// every remaining point coincides with a centroid, the lowest unchosen index
/// is taken.
fn kmeans_plus_plus_init(points: &[&[f32]], k: usize, seed: u64) -> Vec<Vec<f32>> {
    let n = points.len();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut chosen = vec![false; n];
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);

    let first = rng.gen_range(0..n);
    chosen[first] = true;
    centroids.push(points[first].to_vec());

    let mut min_dist: Vec<f64> = points
        .iter()
        .map(|p| squared_distance(p, points[first]))
        .collect();

    while centroids.len() < k {
        let total: f64 = min_dist.iter().sum();
        let next = if total > 0.0 {
            let target = rng.gen::<f64>() * total;
            let mut cumulative = 0.0;
            let mut pick = None;
            for (idx, &d) in min_dist.iter().enumerate() {
                if d <= 0.0 {
                    continue;
                }
                cumulative += d;
                pick = Some(idx);
                if cumulative > target {
                    break;
                }
            }
            pick
        } else {
            None
        };
        let next = next
            .or_else(|| chosen.iter().position(|c| !c))
            .unwrap_or(0);

        chosen[next] = true;
        centroids.push(points[next].to_vec());
        for (d, p) in min_dist.iter_mut().zip(points) {
            *d = d.min(squared_distance(p, points[next]));
        }
    }

    centroids
}

/// Means of assigned points; an empty cluster keeps its previous centroid.
fn recompute_centroids(points: &[&[f32]], assignments: &[usize], previous: &[Vec<f32>]) -> Vec<Vec<f32>> {
    let dimension = previous.first().map_or(0, Vec::len);
    let mut sums = vec![vec![0.0f64; dimension]; previous.len()];
    let mut counts = vec![0usize; previous.len()];

    for (point, &cluster) in points.iter().zip(assignments) {
        counts[cluster] += 1;
        for (acc, &v) in sums[cluster].iter_mut().zip(point.iter()) {
            *acc += f64::from(v);
        }
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), prev)| {
            if count == 0 {
                prev.clone()
            } else {
                sum.into_iter().map(|s| (s / count as f64) as f32).collect()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::new(values.to_vec()).unwrap()
    }

    fn two_groups() -> Vec<EmbeddingVector> {
        vec![
            v(&[0.0, 0.0]),
            v(&[0.0, 0.0]),
            v(&[0.0, 0.0]),
            v(&[10.0, 10.0]),
            v(&[10.0, 10.0]),
            v(&[10.0, 10.0]),
        ]
    }

    #[test]
    fn test_two_tight_groups_get_distinct_clusters() {
        let model = fit(&two_groups(), 2, &KMeansConfig::default()).unwrap();
        let labels = model.assignments();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[1], labels[2]);
        assert_eq!(labels[3], labels[4]);
        assert_eq!(labels[4], labels[5]);
        assert_ne!(labels[0], labels[3]);
        assert!(model.converged());
        assert_eq!(model.sizes().iter().sum::<usize>(), 6);
    }

    #[test]
    fn test_two_groups_independent_of_seed() {
        for seed in 0..16 {
            let config = KMeansConfig::new(100, seed).unwrap();
            let model = fit(&two_groups(), 2, &config).unwrap();
            let labels = model.assignments();
            assert_ne!(labels[0], labels[5], "seed {seed}");
            assert_eq!(model.sizes(), &[3, 3], "seed {seed}");
        }
    }

    #[test]
    fn test_k_greater_than_population_is_config_error() {
        let err = fit(&two_groups(), 7, &KMeansConfig::default()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_k_zero_is_config_error() {
        let err = fit(&two_groups(), 0, &KMeansConfig::default()).unwrap_err();
        assert!(matches!(err, MatchError::Config(_)));
    }

    #[test]
    fn test_empty_population_is_config_error() {
        let err = fit(&[], 1, &KMeansConfig::default()).unwrap_err();
        assert!(matches!(err, MatchError::Config(_)));
    }

    #[test]
    fn test_mixed_dimensions_rejected() {
        let vectors = vec![v(&[1.0, 0.0]), v(&[1.0, 0.0, 0.0])];
        let err = fit(&vectors, 1, &KMeansConfig::default()).unwrap_err();
        assert!(matches!(err, MatchError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_zero_max_iterations_rejected() {
        assert!(KMeansConfig::new(0, 1).is_err());
    }

    #[test]
    fn test_k_equal_to_distinct_population_gives_singletons() {
        let vectors = vec![
            v(&[0.0, 0.0]),
            v(&[1.0, 0.0]),
            v(&[0.0, 1.0]),
            v(&[5.0, 5.0]),
            v(&[-3.0, 2.0]),
        ];
        let model = fit(&vectors, 5, &KMeansConfig::default()).unwrap();
        assert!(model.converged());
        let mut labels = model.assignments().to_vec();
        labels.sort_unstable();
        labels.dedup();
        assert_eq!(labels.len(), 5);
        assert_eq!(model.sizes(), &[1, 1, 1, 1, 1]);
        for (i, vector) in vectors.iter().enumerate() {
            assert_eq!(model.assign(vector), model.assignments()[i]);
        }
    }

    #[test]
    fn test_duplicate_points_with_large_k_do_not_panic() {
        let vectors = vec![v(&[1.0, 1.0]), v(&[1.0, 1.0]), v(&[1.0, 1.0])];
        let model = fit(&vectors, 3, &KMeansConfig::default()).unwrap();
        assert_eq!(model.k(), 3);
        assert_eq!(model.sizes().iter().sum::<usize>(), 3);
        // Identical centroids: every point lands on the lowest index.
        assert!(model.assignments().iter().all(|&c| c == 0));
    }

    #[test]
    fn test_fit_is_reproducible_for_same_seed() {
        let vectors: Vec<EmbeddingVector> = (0..30)
            .map(|i| {
                let x = (i % 7) as f32 * 1.3;
                let y = (i % 5) as f32 * 0.7;
                v(&[x, y])
            })
            .collect();
        let config = KMeansConfig::new(50, 42).unwrap();
        let a = fit(&vectors, 4, &config).unwrap();
        let b = fit(&vectors, 4, &config).unwrap();
        assert_eq!(a.assignments(), b.assignments());
        for c in 0..4 {
            assert_eq!(a.centroid(c), b.centroid(c));
        }
    }

    #[test]
    fn test_iteration_cap_is_respected() {
        let vectors: Vec<EmbeddingVector> =
            (0..50).map(|i| v(&[(i as f32).sin(), (i as f32).cos()])).collect();
        let config = KMeansConfig::new(1, 3).unwrap();
        let model = fit(&vectors, 5, &config).unwrap();
        assert_eq!(model.iterations(), 1);
        assert!(!model.converged());
        for (i, vector) in vectors.iter().enumerate() {
            assert_eq!(model.assign(vector), model.assignments()[i]);
        }
    }

    #[test]
    fn test_assign_picks_nearest_centroid() {
        let model = fit(&two_groups(), 2, &KMeansConfig::default()).unwrap();
        let near_origin = model.assign(&v(&[1.0, 0.5]));
        let near_ten = model.assign(&v(&[9.0, 11.0]));
        assert_eq!(near_origin, model.assignments()[0]);
        assert_eq!(near_ten, model.assignments()[3]);
    }

    #[test]
    fn test_equidistant_vector_takes_lowest_index() {
        let model = fit(&two_groups(), 2, &KMeansConfig::default()).unwrap();
        assert_eq!(model.assign(&v(&[5.0, 5.0])), 0);
        assert_eq!(assign(&model, &v(&[10.0, 0.0])), 0);
    }

    #[test]
    fn test_nearest_by_cosine_uses_direction() {
        let vectors = vec![v(&[1.0, 0.0]), v(&[1.1, 0.0]), v(&[0.0, 1.0]), v(&[0.0, 1.2])];
        let model = fit(&vectors, 2, &KMeansConfig::default()).unwrap();
        let x_cluster = model.assignments()[0];
        let y_cluster = model.assignments()[2];
        assert_eq!(model.nearest_by_cosine(&v(&[50.0, 1.0])), Some(x_cluster));
        assert_eq!(model.nearest_by_cosine(&v(&[0.1, 3.0])), Some(y_cluster));
        assert_eq!(model.nearest_by_cosine(&v(&[0.0, 0.0])), None);
    }

    #[test]
    fn test_summary_reflects_model() {
        let model = fit(&two_groups(), 2, &KMeansConfig::default()).unwrap();
        let summary = model.summary();
        assert_eq!(summary.k, 2);
        assert_eq!(summary.dimension, 2);
        assert_eq!(summary.sizes, vec![3, 3]);
        assert!(summary.inertia.abs() < 1e-9);
    }
}
