//! Persistence layer for the vector index.
//!
//! An index is stored as two artifacts in one directory:
//! - `vector_index.bin`: bincode-encoded header (format version, model id,
//!   corpus digest, dimension, row count, metric)
//! - `embeddings.f32`: the raw row-major float32 array, little-endian
//!
//! Both must be present and agree with each other for a load to succeed.

use crate::error::{RagEvalError, Result};
use crate::index::{FlatIndex, VectorIndex};
use bincode::{Decode, Encode};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Filename of the serialized index structure.
pub const INDEX_FILENAME: &str = "vector_index.bin";

/// Filename of the raw embeddings array.
pub const EMBEDDINGS_FILENAME: &str = "embeddings.f32";

const FORMAT_VERSION: u32 = 2;

/// Distance metric recorded in the header. Only exact L2 is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum Metric {
    L2,
}

#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
struct IndexHeader {
    version: u32,
    metric: Metric,
    model_id: String,
    corpus_digest: String,
    dimension: u64,
    rows: u64,
}

/// Reads and writes index artifacts under a fixed directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILENAME)
    }

    pub fn embeddings_path(&self) -> PathBuf {
        self.dir.join(EMBEDDINGS_FILENAME)
    }

    /// Write both artifacts. Each file is replaced atomically.
    pub fn save(&self, index: &VectorIndex) -> Result<()> {
        if !self.dir.exists() {
            fs::create_dir_all(&self.dir).map_err(|e| RagEvalError::io(&self.dir, e))?;
        }

        let flat = index.flat();
        let header = IndexHeader {
            version: FORMAT_VERSION,
            metric: Metric::L2,
            model_id: index.model_id().to_string(),
            corpus_digest: index.corpus_digest().to_string(),
            dimension: flat.dimension() as u64,
            rows: flat.len() as u64,
        };

        let header_bytes = bincode::encode_to_vec(&header, bincode::config::standard())
            .map_err(|e| RagEvalError::Serialization(e.to_string()))?;

        let mut raw = Vec::with_capacity(flat.as_slice().len() * 4);
        for value in flat.as_slice() {
            raw.extend_from_slice(&value.to_le_bytes());
        }

        write_atomic(&self.embeddings_path(), &raw)?;
        write_atomic(&self.index_path(), &header_bytes)?;

        info!(
            dir = %self.dir.display(),
            rows = flat.len(),
            dimension = flat.dimension(),
            "Saved vector index"
        );
        Ok(())
    }

    /// Load a previously saved index.
    ///
    /// Any problem (missing file, unreadable file, inconsistent artifacts) is
    /// logged and reported as `None` so the caller can rebuild.
    pub fn load(&self) -> Option<VectorIndex> {
        match self.try_load() {
            Ok(index) => {
                info!(
                    dir = %self.dir.display(),
                    rows = index.len(),
                    "Loaded existing vector index"
                );
                Some(index)
            }
            Err(RagEvalError::IndexUnavailable(reason)) if !self.exists() => {
                debug!(reason = %reason, "No persisted vector index");
                None
            }
            Err(e) => {
                warn!(error = %e, "Error loading vector index; it will be rebuilt");
                None
            }
        }
    }

    fn try_load(&self) -> Result<VectorIndex> {
        let index_path = self.index_path();
        let embeddings_path = self.embeddings_path();

        if !index_path.is_file() || !embeddings_path.is_file() {
            return Err(RagEvalError::IndexUnavailable(format!(
                "expected both '{}' and '{}'",
                index_path.display(),
                embeddings_path.display()
            )));
        }

        let header_bytes = fs::read(&index_path).map_err(|e| RagEvalError::io(&index_path, e))?;
        let (header, _): (IndexHeader, usize) =
            bincode::decode_from_slice(&header_bytes, bincode::config::standard())
                .map_err(|e| RagEvalError::IndexUnavailable(format!("corrupt header: {}", e)))?;

        if header.version != FORMAT_VERSION {
            return Err(RagEvalError::IndexUnavailable(format!(
                "unsupported index format version {}",
                header.version
            )));
        }

        let raw = fs::read(&embeddings_path).map_err(|e| RagEvalError::io(&embeddings_path, e))?;
        let expected = header
            .rows
            .checked_mul(header.dimension)
            .and_then(|n| n.checked_mul(4));
        if expected != Some(raw.len() as u64) {
            return Err(RagEvalError::IndexUnavailable(format!(
                "embeddings file has {} bytes, header describes {} x {} float32",
                raw.len(),
                header.rows,
                header.dimension
            )));
        }

        let data: Vec<f32> = raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();

        let flat = FlatIndex::from_raw(header.dimension as usize, data)?;
        Ok(VectorIndex::from_parts(flat, header.model_id).with_corpus_digest(header.corpus_digest))
    }

    /// Check whether both artifacts are present.
    pub fn exists(&self) -> bool {
        self.index_path().is_file() && self.embeddings_path().is_file()
    }

    /// Combined size of both artifacts in bytes.
    pub fn size_on_disk(&self) -> Result<u64> {
        let mut total = 0;
        for path in [self.index_path(), self.embeddings_path()] {
            let metadata = fs::metadata(&path).map_err(|e| RagEvalError::io(&path, e))?;
            total += metadata.len();
        }
        Ok(total)
    }
}

/// Write `data` to a temp file next to `path`, then rename it into place.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| RagEvalError::io(parent, e))?;
    tmp.write_all(data).map_err(|e| RagEvalError::io(tmp.path(), e))?;
    // The temp file is created owner-only; keep whatever mode the target had.
    if let Ok(metadata) = fs::metadata(path) {
        tmp.as_file()
            .set_permissions(metadata.permissions())
            .map_err(|e| RagEvalError::io(tmp.path(), e))?;
    }
    tmp.as_file()
        .sync_all()
        .map_err(|e| RagEvalError::io(tmp.path(), e))?;
    tmp.persist(path).map_err(|e| RagEvalError::io(path, e.error))?;
    Ok(())
}
