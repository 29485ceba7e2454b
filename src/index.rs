//! Exact nearest-neighbour search over document embeddings.
//!
//! [`FlatIndex`] is a brute-force L2 index over a row-major `f32` buffer.
//! Like other flat-index libraries it pads a search that asks for more rows
//! than it holds with [`SENTINEL_ROW`]. [`VectorIndex`] maps results back to
//! documents and drops any padding.

use crate::embeddings::Embedder;
use crate::error::{RagEvalError, Result};
use crate::persistence::IndexStore;
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use tracing::{debug, info};

/// Row id reported for padding slots when `k` exceeds the row count.
pub const SENTINEL_ROW: i64 = -1;

/// Documents are embedded in batches of this size.
const EMBED_BATCH_SIZE: usize = 32;

/// One search hit from a [`FlatIndex`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Row id, or [`SENTINEL_ROW`] for padding.
    pub row: i64,
    /// Squared L2 distance to the query (`f32::INFINITY` for padding).
    pub distance: f32,
}

/// Brute-force L2 index.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    /// Create an empty index for vectors of the given dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            data: Vec::new(),
        }
    }

    /// Rebuild an index from a raw row-major buffer.
    pub fn from_raw(dimension: usize, data: Vec<f32>) -> Result<Self> {
        if dimension == 0 {
            return Err(RagEvalError::InvalidArgument(
                "index dimension must be non-zero".to_string(),
            ));
        }
        if data.len() % dimension != 0 {
            return Err(RagEvalError::DimensionMismatch {
                expected: dimension,
                actual: data.len() % dimension,
            });
        }
        Ok(Self { dimension, data })
    }

    /// Append vectors. Every vector must match the index dimension.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(RagEvalError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        self.data.reserve(vectors.len() * self.dimension);
        for v in vectors {
            self.data.extend_from_slice(v);
        }
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored vectors.
    pub fn len(&self) -> usize {
        if self.dimension == 0 {
            0
        } else {
            self.data.len() / self.dimension
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The raw row-major buffer.
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The `i`-th stored vector.
    pub fn row(&self, i: usize) -> Option<&[f32]> {
        let start = i.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Return exactly `k` neighbours, closest first.
    ///
    /// Ties are broken by the lower row id. Slots beyond the stored row count
    /// are filled with [`SENTINEL_ROW`].
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>> {
        if query.len() != self.dimension {
            return Err(RagEvalError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut hits: Vec<Neighbor> = (0..self.len())
            .filter_map(|row| {
                Some(Neighbor {
                    row: row as i64,
                    distance: squared_l2(query, self.row(row)?),
                })
            })
            .collect();

        hits.sort_by(|a, b| match a.distance.total_cmp(&b.distance) {
            Ordering::Equal => a.row.cmp(&b.row),
            other => other,
        });
        hits.truncate(k);

        while hits.len() < k {
            hits.push(Neighbor {
                row: SENTINEL_ROW,
                distance: f32::INFINITY,
            });
        }

        Ok(hits)
    }
}

/// Hex SHA-256 over the documents in order. Changes whenever any document
/// text or the document order changes.
pub fn corpus_digest(documents: &[String]) -> String {
    let mut hasher = Sha256::new();
    for document in documents {
        hasher.update((document.len() as u64).to_le_bytes());
        hasher.update(document.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Squared Euclidean distance.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

/// A retrieved document with its rank data.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredDocument {
    /// Row in the corpus.
    pub row: usize,
    /// Squared L2 distance from the query embedding.
    pub distance: f32,
    pub document: String,
}

/// Flat index over corpus documents plus the id of the model that built it.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    index: FlatIndex,
    model_id: String,
    corpus_digest: String,
}

impl VectorIndex {
    pub fn from_parts(index: FlatIndex, model_id: impl Into<String>) -> Self {
        Self {
            index,
            model_id: model_id.into(),
            corpus_digest: String::new(),
        }
    }

    /// Record the digest of the documents the rows were built from.
    pub fn with_corpus_digest(mut self, digest: impl Into<String>) -> Self {
        self.corpus_digest = digest.into();
        self
    }

    /// Embed every document and index it, without persisting anything.
    pub fn encode_documents(documents: &[String], embedder: &dyn Embedder) -> Result<Self> {
        let mut index = FlatIndex::new(embedder.dimension());

        for batch in documents.chunks(EMBED_BATCH_SIZE) {
            let texts: Vec<&str> = batch.iter().map(String::as_str).collect();
            let vectors = embedder.encode(&texts)?;
            if vectors.len() != texts.len() {
                return Err(RagEvalError::Embedding(format!(
                    "expected {} vectors, model returned {}",
                    texts.len(),
                    vectors.len()
                )));
            }
            index.add(&vectors)?;
            debug!(rows = index.len(), "Embedded batch");
        }

        Ok(Self::from_parts(index, embedder.model_id()).with_corpus_digest(corpus_digest(documents)))
    }

    /// Embed and index every document, then persist both index artifacts.
    pub fn build(
        documents: &[String],
        embedder: &dyn Embedder,
        store: &IndexStore,
    ) -> Result<Self> {
        if documents.is_empty() {
            return Err(RagEvalError::EmptyCorpus(store.dir().to_path_buf()));
        }

        info!(
            documents = documents.len(),
            model = embedder.model_id(),
            "Building vector index"
        );
        let index = Self::encode_documents(documents, embedder)?;
        store.save(&index)?;
        Ok(index)
    }

    /// The `k` documents closest to `query`, closest first.
    pub fn search(
        &self,
        query: &str,
        embedder: &dyn Embedder,
        documents: &[String],
        k: usize,
    ) -> Result<Vec<String>> {
        Ok(self
            .search_scored(query, embedder, documents, k)?
            .into_iter()
            .map(|hit| hit.document)
            .collect())
    }

    /// Like [`VectorIndex::search`] but keeps row ids and distances.
    ///
    /// Returns `min(k, rows)` hits. Sentinel rows and rows with no matching
    /// document are dropped.
    pub fn search_scored(
        &self,
        query: &str,
        embedder: &dyn Embedder,
        documents: &[String],
        k: usize,
    ) -> Result<Vec<ScoredDocument>> {
        if k == 0 {
            return Err(RagEvalError::InvalidArgument(
                "top_k must be at least 1".to_string(),
            ));
        }

        let query_vector = embedder.encode_one(query)?;
        // One padding slot is enough to exercise the sentinel filter.
        let neighbors = self
            .index
            .search(&query_vector, k.min(self.len().saturating_add(1)))?;

        Ok(neighbors
            .into_iter()
            .filter_map(|n| {
                let row = usize::try_from(n.row).ok()?;
                let document = documents.get(row)?;
                Some(ScoredDocument {
                    row,
                    distance: n.distance,
                    document: document.clone(),
                })
            })
            .collect())
    }

    pub fn flat(&self) -> &FlatIndex {
        &self.index
    }

    /// Model the stored vectors were produced with.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// [`corpus_digest`] of the indexed documents, empty if unknown.
    pub fn corpus_digest(&self) -> &str {
        &self.corpus_digest
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.index.dimension()
    }
}
