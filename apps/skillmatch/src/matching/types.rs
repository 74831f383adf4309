//! Value types shared by every stage of the matching engine.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::matching::error::MatchError;

/// A normalized skill token: lowercase, punctuation-stripped, possibly a
/// compound such as `machine_learning`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkillTerm(String);

impl SkillTerm {
    /// Separator used when a phrase is merged into one compound term.
    pub const COMPOUND_SEPARATOR: char = '_';

    pub fn new(term: impl Into<String>) -> Self {
        Self(term.into().to_lowercase())
    }

    /// Normalizes a free-form skill name: `"Machine  Learning"` becomes the
    /// compound `machine_learning`. `None` for blank input.
    pub fn from_phrase(phrase: &str) -> Option<Self> {
        let words: Vec<&str> = phrase.split_whitespace().collect();
        if words.is_empty() {
            return None;
        }
        Some(Self::new(
            words.join(&Self::COMPOUND_SEPARATOR.to_string()),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_compound(&self) -> bool {
        self.0.contains(Self::COMPOUND_SEPARATOR)
    }

    /// The individual words of a compound term (a single element otherwise).
    pub fn parts(&self) -> impl Iterator<Item = &str> {
        self.0
            .split(Self::COMPOUND_SEPARATOR)
            .filter(|p| !p.is_empty())
    }
}

impl fmt::Display for SkillTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dense, fixed-length vector for a term or an entity.
///
/// Components are always finite; constructors that could introduce NaN or
/// infinity return `None` instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct EmbeddingVector(Vec<f32>);

impl TryFrom<Vec<f32>> for EmbeddingVector {
    type Error = &'static str;

    fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
        Self::new(values).ok_or("embedding vector must be non-empty with finite components")
    }
}

impl From<EmbeddingVector> for Vec<f32> {
    fn from(vector: EmbeddingVector) -> Self {
        vector.0
    }
}

impl EmbeddingVector {
    /// Wraps raw components, rejecting empty or non-finite input.
    pub fn new(values: Vec<f32>) -> Option<Self> {
        if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Self(values))
    }

    /// Unweighted arithmetic mean of equally sized vectors.
    ///
    /// Vectors whose length differs from the first one are ignored.
    pub fn mean<'a, I>(vectors: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a EmbeddingVector>,
    {
        let mut iter = vectors.into_iter();
        let first = iter.next()?;
        let mut sum: Vec<f64> = first.0.iter().map(|&v| f64::from(v)).collect();
        let mut count = 1usize;

        for vector in iter {
            if vector.dimension() != sum.len() {
                continue;
            }
            for (acc, &v) in sum.iter_mut().zip(&vector.0) {
                *acc += f64::from(v);
            }
            count += 1;
        }

        let n = count as f64;
        Self::new(sum.into_iter().map(|s| (s / n) as f32).collect())
    }

    pub fn dimension(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// False for the all-zero vector, whose cosine similarity is undefined.
    pub fn has_norm(&self) -> bool {
        self.0.iter().any(|&v| v != 0.0)
    }
}

/// Which population an entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityKind {
    JobSeeker,
    Project,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::JobSeeker, EntityKind::Project];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::JobSeeker => "job_seeker",
            EntityKind::Project => "project",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = MatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "job_seeker" | "job_seekers" | "candidate" | "candidates" => Ok(EntityKind::JobSeeker),
            "project" | "projects" => Ok(EntityKind::Project),
            other => Err(MatchError::Config(format!("unknown entity kind '{other}'"))),
        }
    }
}

/// The unit being matched. The caller owns and persists it; the engine only
/// computes `terms`, `vector` and `cluster_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityProfile {
    pub id: String,
    pub kind: EntityKind,
    pub terms: Vec<SkillTerm>,
    /// `None` is the EMPTY sentinel: no term could be embedded.
    pub vector: Option<EmbeddingVector>,
    /// `None` until the entity's population has a fitted cluster model.
    pub cluster_id: Option<usize>,
}

/// A stored entity record handed in by the caller for ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    #[serde(default)]
    pub vector: Option<EmbeddingVector>,
    #[serde(default)]
    pub cluster_id: Option<usize>,
}

/// One ranked recommendation. Produced as output only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch {
    pub id: String,
    /// Cosine similarity in [-1, 1].
    pub score: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skill_term_lowercases() {
        assert_eq!(SkillTerm::new("Python").as_str(), "python");
    }

    #[test]
    fn test_from_phrase_joins_words_into_compound() {
        let term = SkillTerm::from_phrase("  Machine \t Learning ").unwrap();
        assert_eq!(term.as_str(), "machine_learning");
        assert_eq!(SkillTerm::from_phrase("Rust").unwrap().as_str(), "rust");
        assert!(SkillTerm::from_phrase("   ").is_none());
    }

    #[test]
    fn test_compound_parts() {
        let term = SkillTerm::new("machine_learning");
        assert!(term.is_compound());
        assert_eq!(term.parts().collect::<Vec<_>>(), vec!["machine", "learning"]);
        assert!(!SkillTerm::new("rust").is_compound());
    }

    #[test]
    fn test_embedding_vector_rejects_non_finite() {
        assert!(EmbeddingVector::new(vec![1.0, f32::NAN]).is_none());
        assert!(EmbeddingVector::new(vec![f32::INFINITY]).is_none());
        assert!(EmbeddingVector::new(vec![]).is_none());
        assert!(EmbeddingVector::new(vec![0.0, 1.5]).is_some());
    }

    #[test]
    fn test_mean_of_one_is_identity() {
        let v = EmbeddingVector::new(vec![0.25, -1.5, 3.0]).unwrap();
        let mean = EmbeddingVector::mean([&v]).unwrap();
        assert_eq!(mean, v);
    }

    #[test]
    fn test_mean_averages_components() {
        let a = EmbeddingVector::new(vec![1.0, 0.0]).unwrap();
        let b = EmbeddingVector::new(vec![3.0, 2.0]).unwrap();
        let mean = EmbeddingVector::mean([&a, &b]).unwrap();
        assert_eq!(mean.as_slice(), &[2.0, 1.0]);
    }

    #[test]
    fn test_mean_of_nothing_is_empty() {
        assert!(EmbeddingVector::mean(std::iter::empty()).is_none());
    }

    #[test]
    fn test_has_norm() {
        assert!(EmbeddingVector::new(vec![0.0, -0.5]).unwrap().has_norm());
        assert!(!EmbeddingVector::new(vec![0.0, 0.0]).unwrap().has_norm());
    }

    #[test]
    fn test_embedding_vector_serde_validates() {
        let v: EmbeddingVector = serde_json::from_str("[0.5, -1.0]").unwrap();
        assert_eq!(v.as_slice(), &[0.5, -1.0]);
        assert_eq!(serde_json::to_string(&v).unwrap(), "[0.5,-1.0]");
        assert!(serde_json::from_str::<EmbeddingVector>("[]").is_err());
    }

    #[test]
    fn test_entity_kind_parses_path_forms() {
        assert_eq!("job_seeker".parse::<EntityKind>().unwrap(), EntityKind::JobSeeker);
        assert_eq!("job-seekers".parse::<EntityKind>().unwrap(), EntityKind::JobSeeker);
        assert_eq!("PROJECT".parse::<EntityKind>().unwrap(), EntityKind::Project);
        assert!("company".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_entity_kind_serde_screaming_snake() {
        let json = serde_json::to_string(&EntityKind::JobSeeker).unwrap();
        assert_eq!(json, r#""JOB_SEEKER""#);
        let kind: EntityKind = serde_json::from_str(r#""PROJECT""#).unwrap();
        assert_eq!(kind, EntityKind::Project);
    }
}
