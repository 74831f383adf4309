//! Keyword extraction: turns free-text profile or project copy into a set of
//! normalized skill terms.
//!
//! Pipeline: lowercase → tokenize on word boundaries (keeping `+`, `#` and
//! internal `.`/`-`, so `c++`, `c#` and `node.js` survive) → greedy
//! longest-match phrase merge (`machine learning` → `machine_learning`) →
//! drop stop-words and tokens without a letter → deduplicate.
//!
//! Extraction never fails: empty or garbage text yields an empty set.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::matching::error::{MatchError, MatchResult};
use crate::matching::types::SkillTerm;

const DEFAULT_PHRASES: &[&str] = &[
    "machine learning",
    "deep learning",
    "reinforcement learning",
    "data science",
    "data engineering",
    "data analysis",
    "computer vision",
    "natural language processing",
    "artificial intelligence",
    "big data",
    "cloud computing",
    "web development",
    "mobile development",
    "software engineering",
    "project management",
    "product management",
    "quality assurance",
    "unit testing",
    "user experience",
    "user interface",
    "ruby on rails",
    "spring boot",
    "react native",
    "google cloud",
    "power bi",
    "version control",
    "continuous integration",
    "distributed systems",
    "embedded systems",
    "operating systems",
];

const DEFAULT_STOP_WORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "also", "am", "an", "and", "any",
    "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
    "but", "by", "can", "could", "did", "do", "does", "doing", "down", "during", "each", "etc",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "him", "his", "how", "i", "if", "in", "including", "into", "is", "it", "its", "just", "like",
    "me", "more", "most", "my", "no", "nor", "not", "now", "of", "off", "on", "once", "only",
    "or", "other", "our", "ours", "out", "over", "own", "same", "she", "should", "so", "some",
    "such", "than", "that", "the", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "using", "very", "via", "was", "we",
    "well", "were", "what", "when", "where", "which", "while", "who", "whom", "why", "will",
    "with", "would", "you", "your", "yours",
];

static TOKEN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[\p{L}\p{N}]+(?:[.\-][\p{L}\p{N}]+)*[+#]*").expect("valid regex")
});

/// Lowercases and splits text into raw word tokens.
fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TOKEN_REGEX
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Reads a newline-delimited word list, skipping blank lines and `#` comments.
fn read_list(path: &Path, what: &str) -> MatchResult<Vec<String>> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        MatchError::config(format!("failed to read {what} {}: {e}", path.display()))
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}

// ────────────────────────────────────────────────────────────────────────────
// Phrase dictionary
// ────────────────────────────────────────────────────────────────────────────

/// Multi-word domain phrases that are merged into a single compound term.
///
/// Phrases are normalized with the same tokenizer as the input text, so
/// `"Ruby on Rails"` in the dictionary matches `ruby on rails` in a bio.
#[derive(Debug, Clone, Default)]
pub struct PhraseDictionary {
    /// first token → candidate phrases (as token sequences), longest first
    by_first: HashMap<String, Vec<Vec<String>>>,
    len: usize,
}

impl PhraseDictionary {
    pub fn new<I, S>(phrases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut dict = PhraseDictionary::default();
        let mut seen = HashSet::new();

        for phrase in phrases {
            let tokens = tokenize(phrase.as_ref());
            if tokens.len() < 2 || !seen.insert(tokens.clone()) {
                continue;
            }
            dict.by_first
                .entry(tokens[0].clone())
                .or_default()
                .push(tokens);
            dict.len += 1;
        }

        for candidates in dict.by_first.values_mut() {
            candidates.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        }
        dict
    }

    /// Built-in list of common technology phrases.
    pub fn builtin() -> Self {
        Self::new(DEFAULT_PHRASES)
    }

    /// Loads a newline-delimited phrase list.
    pub fn from_file(path: &Path) -> MatchResult<Self> {
        Ok(Self::new(read_list(path, "phrase dictionary")?))
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Longest phrase starting at `tokens[start]`, as a token count.
    fn longest_match(&self, tokens: &[String], start: usize) -> Option<usize> {
        let candidates = self.by_first.get(&tokens[start])?;
        candidates
            .iter()
            .find(|phrase| tokens[start..].starts_with(phrase.as_slice()))
            .map(Vec::len)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stop words
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct StopWords(HashSet<String>);

impl StopWords {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            words
                .into_iter()
                .map(|w| w.as_ref().trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        )
    }

    pub fn builtin() -> Self {
        Self::new(DEFAULT_STOP_WORDS)
    }

    pub fn from_file(path: &Path) -> MatchResult<Self> {
        Ok(Self::new(read_list(path, "stop-word list")?))
    }

    pub fn contains(&self, token: &str) -> bool {
        self.0.contains(token)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Extractor
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct KeywordExtractor {
    phrases: PhraseDictionary,
    stop_words: StopWords,
}

impl Default for KeywordExtractor {
    fn default() -> Self {
        Self::new(PhraseDictionary::builtin(), StopWords::builtin())
    }
}

impl KeywordExtractor {
    pub fn new(phrases: PhraseDictionary, stop_words: StopWords) -> Self {
        Self {
            phrases,
            stop_words,
        }
    }

    /// Extracts the deduplicated set of skill terms from `text`.
    pub fn extract(&self, text: &str) -> BTreeSet<SkillTerm> {
        let tokens = tokenize(text);
        let mut terms = BTreeSet::new();
        let mut i = 0;

        while i < tokens.len() {
            if let Some(len) = self.phrases.longest_match(&tokens, i) {
                let compound = tokens[i..i + len].join("_");
                terms.insert(SkillTerm::new(compound));
                i += len;
                continue;
            }

            let token = &tokens[i];
            if !self.stop_words.contains(token) && token.chars().any(char::is_alphabetic) {
                terms.insert(SkillTerm::new(token.as_str()));
            }
            i += 1;
        }

        debug!(tokens = tokens.len(), terms = terms.len(), "extracted skill terms");
        terms
    }
}
