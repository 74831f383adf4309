//! Embedding resolver: maps skill terms to dense vectors with a pretrained
//! subword model and averages them into one entity vector.
//!
//! Two on-disk formats are understood:
//! - fastText binary (`.bin`, version 12, non-quantized): full vocabulary plus
//!   hashed character n-gram buckets, so out-of-vocabulary terms are composed
//!   from their subwords.
//! - word2vec/fastText text (`.vec` or anything else): one `word v1 .. vd`
//!   line per word, optional `count dim` header. No subword information, so
//!   unknown terms simply fail lookup.
//!
//! The model is loaded once at startup and shared read-only behind an `Arc`.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::matching::error::{MatchError, MatchResult};
use crate::matching::types::{EmbeddingVector, SkillTerm};

const FASTTEXT_MAGIC: i32 = 793_712_314;
const FASTTEXT_VERSION: i32 = 12;
const BOW: &str = "<";
/// Upper bound on up-front allocation driven by header counts; anything
/// larger grows as rows are actually read.
const MAX_PREALLOC: usize = 1 << 22;
const EOW: &str = ">";

// ────────────────────────────────────────────────────────────────────────────
// Trait definition
// ────────────────────────────────────────────────────────────────────────────

/// Source of per-term vectors. `EmbeddingResolver` holds an
/// `Arc<dyn TermEmbeddings>` so the backing model can be swapped at startup.
pub trait TermEmbeddings: Send + Sync {
    fn dimension(&self) -> usize;

    /// Vector for one term, or `None` if the lookup fails entirely.
    fn term_vector(&self, term: &str) -> Option<EmbeddingVector>;
}

// ────────────────────────────────────────────────────────────────────────────
// Pretrained model
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct SubwordTable {
    nwords: usize,
    bucket: usize,
    minn: usize,
    maxn: usize,
    /// Present for pruned models: hashed bucket → compacted bucket.
    pruned: Option<HashMap<i32, i32>>,
}

impl SubwordTable {
    /// Row indices of every character n-gram of `<word>`, following
    /// fastText's byte-level, UTF-8 aware enumeration.
    fn rows(&self, word: &str) -> Vec<usize> {
        let mut rows = Vec::new();
        if self.bucket == 0 || self.maxn == 0 {
            return rows;
        }

        let wrapped = format!("{BOW}{word}{EOW}");
        let bytes = wrapped.as_bytes();
        let len = bytes.len();

        for i in 0..len {
            if is_continuation(bytes[i]) {
                continue;
            }
            let mut ngram: Vec<u8> = Vec::new();
            let mut j = i;
            let mut n = 1;
            while j < len && n <= self.maxn {
                ngram.push(bytes[j]);
                j += 1;
                while j < len && is_continuation(bytes[j]) {
                    ngram.push(bytes[j]);
                    j += 1;
                }
                if n >= self.minn && !(n == 1 && (i == 0 || j == len)) {
                    let hashed = (fnv1a(&ngram) % self.bucket as u32) as i32;
                    if let Some(row) = self.bucket_row(hashed) {
                        rows.push(row);
                    }
                }
                n += 1;
            }
        }
        rows
    }

    fn bucket_row(&self, hashed: i32) -> Option<usize> {
        let id = match &self.pruned {
            None => hashed,
            Some(map) => *map.get(&hashed)?,
        };
        usize::try_from(id).ok().map(|id| self.nwords + id)
    }
}

fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// 32-bit FNV-1a over sign-extended bytes, as fastText hashes n-grams.
fn fnv1a(bytes: &[u8]) -> u32 {
    let mut h: u32 = 2_166_136_261;
    for &b in bytes {
        h ^= (b as i8) as u32;
        h = h.wrapping_mul(16_777_619);
    }
    h
}

/// A pretrained word/subword embedding matrix held in memory.
#[derive(Debug, Clone)]
pub struct EmbeddingModel {
    dimension: usize,
    vocab: HashMap<String, usize>,
    /// Row-major, `rows × dimension`.
    matrix: Vec<f32>,
    subwords: Option<SubwordTable>,
}

impl EmbeddingModel {
    /// Loads a model file, picking the format from the extension.
    pub fn load(path: &Path) -> MatchResult<Self> {
        let file = File::open(path).map_err(|e| MatchError::model_unavailable(path, e))?;
        let reader = BufReader::new(file);

        let is_binary = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("bin"));

        let model = if is_binary {
            Self::from_fasttext_bin(reader)
        } else {
            Self::from_text(reader)
        }
        .map_err(|reason| MatchError::model_unavailable(path, reason))?;

        info!(
            path = %path.display(),
            words = model.vocab_size(),
            dimension = model.dimension,
            subword_buckets = model.subwords.as_ref().map(|s| s.bucket).unwrap_or(0),
            "embedding model loaded"
        );
        Ok(model)
    }

    /// Builds a word-only model from in-memory vectors.
    #[allow(dead_code)]
    pub fn from_words<I, S>(dimension: usize, words: I) -> MatchResult<Self>
    where
        I: IntoIterator<Item = (S, Vec<f32>)>,
        S: Into<String>,
    {
        if dimension == 0 {
            return Err(MatchError::config("embedding dimension must be > 0"));
        }
        let mut vocab = HashMap::new();
        let mut matrix = Vec::new();
        for (word, vector) in words {
            if vector.len() != dimension {
                return Err(MatchError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            let word = word.into();
            if vocab.contains_key(&word) {
                continue;
            }
            vocab.insert(word, vocab.len());
            matrix.extend(vector);
        }
        Ok(Self {
            dimension,
            vocab,
            matrix,
            subwords: None,
        })
    }

    /// Parses word2vec/fastText text vectors.
    pub fn from_text<R: BufRead>(reader: R) -> Result<Self, String> {
        let mut dimension: Option<usize> = None;
        let mut vocab = HashMap::new();
        let mut matrix = Vec::new();
        let mut skipped = 0usize;

        for (line_no, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| format!("read error at line {}: {e}", line_no + 1))?;
            let mut fields = line.split_whitespace();
            let Some(word) = fields.next() else {
                continue;
            };
            let rest: Vec<&str> = fields.collect();

            if line_no == 0 && rest.len() == 1 && word.parse::<usize>().is_ok() {
                let dim = rest[0]
                    .parse::<usize>()
                    .map_err(|e| format!("invalid header dimension: {e}"))?;
                dimension = Some(dim);
                continue;
            }

            let values: Option<Vec<f32>> = rest
                .iter()
                .map(|v| v.parse::<f32>().ok().filter(|f| f.is_finite()))
                .collect();
            let Some(values) = values else {
                skipped += 1;
                continue;
            };

            let dim = *dimension.get_or_insert(values.len());
            if dim == 0 || values.len() != dim || vocab.contains_key(word) {
                skipped += 1;
                continue;
            }
            vocab.insert(word.to_string(), vocab.len());
            matrix.extend(values);
        }

        if skipped > 0 {
            warn!(skipped, "skipped malformed embedding lines");
        }
        let dimension = dimension.filter(|d| *d > 0).ok_or("no vectors found")?;
        if vocab.is_empty() {
            return Err("no vectors found".to_string());
        }

        Ok(Self {
            dimension,
            vocab,
            matrix,
            subwords: None,
        })
    }

    /// Parses a fastText `.bin` model (dictionary + input matrix).
    pub fn from_fasttext_bin<R: Read>(mut reader: R) -> Result<Self, String> {
        let r = &mut reader;
        let magic = read_i32(r)?;
        if magic != FASTTEXT_MAGIC {
            return Err(format!("not a fastText model (magic {magic})"));
        }
        let version = read_i32(r)?;
        if version > FASTTEXT_VERSION {
            return Err(format!("unsupported fastText version {version}"));
        }

        // args: dim ws epoch minCount neg wordNgrams loss model bucket minn maxn lrUpdateRate t
        let dim = read_i32(r)?;
        let _ws = read_i32(r)?;
        let _epoch = read_i32(r)?;
        let _min_count = read_i32(r)?;
        let _neg = read_i32(r)?;
        let _word_ngrams = read_i32(r)?;
        let _loss = read_i32(r)?;
        let _model = read_i32(r)?;
        let bucket = read_i32(r)?;
        let minn = read_i32(r)?;
        let maxn = read_i32(r)?;
        let _lr_update_rate = read_i32(r)?;
        let _t = read_f64(r)?;

        let dimension = positive(dim, "dim")?;

        // dictionary
        let size = positive(read_i32(r)?, "dictionary size")?;
        let nwords = non_negative(read_i32(r)?, "nwords")?;
        let _nlabels = read_i32(r)?;
        let _ntokens = read_i64(r)?;
        let prune_size = read_i64(r)?;

        let mut vocab = HashMap::with_capacity(nwords.min(MAX_PREALLOC));
        for id in 0..size {
            let word = read_cstring(r)?;
            let _count = read_i64(r)?;
            let entry_type = read_u8(r)?;
            if entry_type == 0 && id < nwords {
                vocab.insert(word, id);
            }
        }

        let pruned = if prune_size >= 0 {
            let mut map = HashMap::new();
            for _ in 0..prune_size {
                let first = read_i32(r)?;
                let second = read_i32(r)?;
                map.insert(first, second);
            }
            Some(map)
        } else {
            None
        };

        if read_u8(r)? != 0 {
            return Err("quantized models are not supported".to_string());
        }

        let rows = non_negative_i64(read_i64(r)?, "matrix rows")?;
        let cols = non_negative_i64(read_i64(r)?, "matrix cols")?;
        if cols != dimension {
            return Err(format!("matrix has {cols} columns, expected {dimension}"));
        }
        if rows < nwords {
            return Err(format!("matrix has {rows} rows for {nwords} words"));
        }

        let total = rows
            .checked_mul(cols)
            .ok_or_else(|| format!("matrix size {rows} x {cols} overflows"))?;
        let mut matrix = Vec::with_capacity(total.min(MAX_PREALLOC));
        let mut row_buf = vec![0u8; cols * 4];
        for _ in 0..rows {
            r.read_exact(&mut row_buf)
                .map_err(|e| format!("truncated input matrix: {e}"))?;
            matrix.extend(
                row_buf
                    .chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])),
            );
        }

        // The n-gram hash modulus is the declared bucket count; pruned models
        // store fewer rows and remap through `pruned`.
        let subwords = SubwordTable {
            nwords,
            bucket: usize::try_from(bucket).unwrap_or(0),
            minn: usize::try_from(minn).unwrap_or(0),
            maxn: usize::try_from(maxn).unwrap_or(0),
            pruned,
        };
        debug!(
            bucket = subwords.bucket,
            stored_rows = rows - nwords,
            minn = subwords.minn,
            maxn = subwords.maxn,
            "fastText subword table"
        );

        Ok(Self {
            dimension,
            vocab,
            matrix,
            subwords: Some(subwords),
        })
    }

    pub fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn has_subwords(&self) -> bool {
        self.subwords
            .as_ref()
            .is_some_and(|s| s.bucket > 0 && s.maxn > 0)
    }

    fn row(&self, index: usize) -> Option<&[f32]> {
        let start = index.checked_mul(self.dimension)?;
        self.matrix.get(start..start + self.dimension)
    }
}

impl TermEmbeddings for EmbeddingModel {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn term_vector(&self, term: &str) -> Option<EmbeddingVector> {
        let mut rows: Vec<usize> = Vec::new();
        if let Some(&id) = self.vocab.get(term) {
            rows.push(id);
        }
        if let Some(table) = &self.subwords {
            rows.extend(table.rows(term));
        }

        let mut sum = vec![0.0f64; self.dimension];
        let mut count = 0usize;
        for row in rows.into_iter().filter_map(|i| self.row(i)) {
            for (acc, &v) in sum.iter_mut().zip(row) {
                *acc += f64::from(v);
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }

        let n = count as f64;
        EmbeddingVector::new(sum.into_iter().map(|s| (s / n) as f32).collect())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Binary readers
// ────────────────────────────────────────────────────────────────────────────

fn read_array<const N: usize, R: Read>(r: &mut R) -> Result<[u8; N], String> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)
        .map_err(|e| format!("unexpected end of model file: {e}"))?;
    Ok(buf)
}

fn read_i32<R: Read>(r: &mut R) -> Result<i32, String> {
    read_array::<4, _>(r).map(i32::from_le_bytes)
}

fn read_i64<R: Read>(r: &mut R) -> Result<i64, String> {
    read_array::<8, _>(r).map(i64::from_le_bytes)
}

fn read_f64<R: Read>(r: &mut R) -> Result<f64, String> {
    read_array::<8, _>(r).map(f64::from_le_bytes)
}

fn read_u8<R: Read>(r: &mut R) -> Result<u8, String> {
    read_array::<1, _>(r).map(|b| b[0])
}

fn read_cstring<R: Read>(r: &mut R) -> Result<String, String> {
    let mut bytes = Vec::new();
    loop {
        match read_u8(r)? {
            0 => break,
            b => bytes.push(b),
        }
    }
    String::from_utf8(bytes).map_err(|e| format!("dictionary entry is not UTF-8: {e}"))
}

fn positive(value: i32, field: &str) -> Result<usize, String> {
    usize::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| format!("invalid {field}: {value}"))
}

fn non_negative(value: i32, field: &str) -> Result<usize, String> {
    usize::try_from(value).map_err(|_| format!("invalid {field}: {value}"))
}

fn non_negative_i64(value: i64, field: &str) -> Result<usize, String> {
    usize::try_from(value).map_err(|_| format!("invalid {field}: {value}"))
}

// ────────────────────────────────────────────────────────────────────────────
// Resolver
// ────────────────────────────────────────────────────────────────────────────

/// Turns a term set into one entity vector (unweighted mean of term vectors).
#[derive(Clone)]
pub struct EmbeddingResolver {
    embeddings: Arc<dyn TermEmbeddings>,
}

impl EmbeddingResolver {
    pub fn new(embeddings: Arc<dyn TermEmbeddings>) -> Self {
        Self { embeddings }
    }

    pub fn dimension(&self) -> usize {
        self.embeddings.dimension()
    }

    /// Resolves a single term. A compound whose lookup fails entirely falls
    /// back to the mean of its component words.
    pub fn term_vector(&self, term: &SkillTerm) -> Option<EmbeddingVector> {
        if let Some(vector) = self.embeddings.term_vector(term.as_str()) {
            return Some(vector);
        }
        if !term.is_compound() {
            return None;
        }
        let parts: Vec<EmbeddingVector> = term
            .parts()
            .filter_map(|part| self.embeddings.term_vector(part))
            .collect();
        EmbeddingVector::mean(&parts)
    }

    /// Mean of all resolvable term vectors; `None` (EMPTY) when the set is
    /// empty or nothing resolves. Failed terms are skipped, never zero-filled.
    pub fn vectorize<'a, I>(&self, terms: I) -> Option<EmbeddingVector>
    where
        I: IntoIterator<Item = &'a SkillTerm>,
    {
        let mut resolved = Vec::new();
        let mut missed = 0usize;
        for term in terms {
            match self.term_vector(term) {
                Some(v) => resolved.push(v),
                None => missed += 1,
            }
        }
        if missed > 0 {
            debug!(resolved = resolved.len(), missed, "skipped unresolvable terms");
        }
        EmbeddingVector::mean(&resolved)
    }
}
