//! Similarity ranking: cosine similarity of a query vector against a
//! candidate list, sorted best-first.

use std::cmp::Ordering;

use tracing::{debug, warn};

use crate::matching::types::{EmbeddingVector, RankedMatch};

/// Cosine similarity in [-1, 1], computed in `f64`.
///
/// Returns `None` when either vector has zero norm (similarity undefined) or
/// the dimensions differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        warn!(
            a_len = a.len(),
            b_len = b.len(),
            "embedding dimension mismatch; similarity undefined"
        );
        return None;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }

    Some((dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0))
}

/// Score-descending, then id-ascending.
fn by_score_then_id(a: &RankedMatch, b: &RankedMatch) -> Ordering {
    b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id))
}

/// Ranks `candidates` by cosine similarity to `query`.
///
/// Zero-norm candidates are excluded rather than scored. An empty candidate
/// list (or a zero-norm query) yields an empty ranking. No truncation is
/// applied; callers slice the result.
pub fn rank<'a, I>(query: &EmbeddingVector, candidates: I) -> Vec<RankedMatch>
where
    I: IntoIterator<Item = (&'a str, &'a EmbeddingVector)>,
{
    let mut excluded = 0usize;
    let mut ranked: Vec<RankedMatch> = candidates
        .into_iter()
        .filter_map(|(id, vector)| {
            let score = cosine_similarity(query.as_slice(), vector.as_slice());
            if score.is_none() {
                excluded += 1;
            }
            score.map(|score| RankedMatch {
                id: id.to_string(),
                score,
            })
        })
        .collect();

    ranked.sort_by(by_score_then_id);

    if excluded > 0 {
        debug!(excluded, ranked = ranked.len(), "excluded candidates with undefined similarity");
    }
    ranked
}
