//! Persisted similarity index.
//!
//! A [`VectorIndex`] holds `(embedding, chunk)` pairs and answers exact
//! nearest-neighbor queries by cosine similarity. On disk it is a directory
//! containing a single SQLite database:
//!
//! ```text
//! <index dir>/
//!   index.sqlite
//!     index_meta(key, value)   format_version, embedding_model, dims,
//!                              metric, entry_count, created_at
//!     entries(position, chunk_id, source, doc_type, page, chunk_index,
//!             text, hash, vector BLOB)
//! ```
//!
//! The metadata makes the index self-describing: it can be reloaded in a
//! later session without the original documents, and a query embedder that
//! does not match the one used at build time is rejected.
//!
//! Saving never edits an existing index. A complete copy is written to a
//! sibling staging directory and then swapped in place of the old one. If
//! two saves race, the one whose rename finds the directory already
//! re-created by the other fails with an I/O error and leaves that index in
//! place. A failed save never leaves its staging directory behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use sqlx::Row;
use thiserror::Error;

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob, Embedder};
use crate::models::{Chunk, DocumentMetadata, FileKind};

pub const INDEX_DB_FILE: &str = "index.sqlite";
const FORMAT_VERSION: &str = "1";
const METRIC: &str = "cosine";

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("no index found at {}", .0.display())]
    NotFound(PathBuf),
    #[error(
        "index was built with embedding model '{indexed}' ({indexed_dims} dims) \
         but the query embedder is '{query}' ({query_dims} dims)"
    )]
    EmbedderMismatch {
        indexed: String,
        indexed_dims: usize,
        query: String,
        query_dims: usize,
    },
    #[error("vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("index is corrupt: {0}")]
    Corrupt(String),
    #[error("index database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether the pipeline has something to answer from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexState {
    Empty,
    Ready,
}

/// The existence of the index directory is the only readiness signal.
pub fn index_state(config: &Config) -> IndexState {
    if config.index.dir.exists() {
        IndexState::Ready
    } else {
        IndexState::Empty
    }
}

#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub vector: Vec<f32>,
    pub chunk: Chunk,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    embedding_model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    pub fn new(embedding_model: impl Into<String>, dims: usize) -> Self {
        Self {
            embedding_model: embedding_model.into(),
            dims,
            entries: Vec::new(),
        }
    }

    /// An empty index keyed to `embedder`.
    pub fn for_embedder(embedder: &dyn Embedder) -> Self {
        Self::new(embedder.model_name(), embedder.dims())
    }

    pub fn add(&mut self, chunk: Chunk, vector: Vec<f32>) -> Result<(), IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                actual: vector.len(),
            });
        }
        self.entries.push(IndexEntry { vector, chunk });
        Ok(())
    }

    pub fn embedding_model(&self) -> &str {
        &self.embedding_model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Reject an embedder other than the one the index was built with.
    pub fn ensure_compatible(&self, embedder: &dyn Embedder) -> Result<(), IndexError> {
        if embedder.model_name() != self.embedding_model || embedder.dims() != self.dims {
            return Err(IndexError::EmbedderMismatch {
                indexed: self.embedding_model.clone(),
                indexed_dims: self.dims,
                query: embedder.model_name().to_string(),
                query_dims: embedder.dims(),
            });
        }
        Ok(())
    }

    /// The `k` entries most similar to `query`, closest first. Equal scores
    /// keep insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored
            .into_iter()
            .take(k)
            .map(|(i, score)| SearchHit {
                chunk: self.entries[i].chunk.clone(),
                score,
            })
            .collect()
    }

    /// Write the index to `dir`, replacing whatever was there.
    pub async fn save(&self, dir: &Path) -> Result<(), IndexError> {
        let staging = staging_dir(dir);
        std::fs::create_dir_all(&staging)?;

        if let Err(e) = self.write_db(&staging.join(INDEX_DB_FILE)).await {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e);
        }

        if dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                let _ = std::fs::remove_dir_all(&staging);
                return Err(e.into());
            }
        }
        if let Err(e) = std::fs::rename(&staging, dir) {
            let _ = std::fs::remove_dir_all(&staging);
            return Err(e.into());
        }
        tracing::debug!(path = %dir.display(), entries = self.len(), "index saved");
        Ok(())
    }

    async fn write_db(&self, db_path: &Path) -> Result<(), IndexError> {
        let pool = db::connect(db_path, true).await?;
        db::create_schema(&pool).await?;

        let mut tx = pool.begin().await?;
        let meta = [
            ("format_version", FORMAT_VERSION.to_string()),
            ("embedding_model", self.embedding_model.clone()),
            ("dims", self.dims.to_string()),
            ("metric", METRIC.to_string()),
            ("entry_count", self.entries.len().to_string()),
            ("created_at", chrono::Utc::now().to_rfc3339()),
        ];
        for (key, value) in meta {
            sqlx::query("INSERT INTO index_meta (key, value) VALUES (?, ?)")
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }

        for (position, entry) in self.entries.iter().enumerate() {
            let chunk = &entry.chunk;
            sqlx::query(
                r#"
                INSERT INTO entries (position, chunk_id, source, doc_type, page, chunk_index, text, hash, vector)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(position as i64)
            .bind(&chunk.id)
            .bind(&chunk.metadata.source)
            .bind(chunk.metadata.kind.tag())
            .bind(chunk.metadata.page.map(i64::from))
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(vec_to_blob(&entry.vector))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        pool.close().await;
        Ok(())
    }

    /// Read an index previously written by [`VectorIndex::save`].
    pub async fn load(dir: &Path) -> Result<Self, IndexError> {
        if !dir.exists() {
            return Err(IndexError::NotFound(dir.to_path_buf()));
        }
        let db_path = dir.join(INDEX_DB_FILE);
        if !db_path.exists() {
            return Err(IndexError::Corrupt(format!(
                "{} is missing {}",
                dir.display(),
                INDEX_DB_FILE
            )));
        }

        let pool = db::connect(&db_path, false).await?;
        let result = read_db(&pool).await;
        pool.close().await;
        result
    }
}

async fn read_db(pool: &sqlx::SqlitePool) -> Result<VectorIndex, IndexError> {
    let meta: HashMap<String, String> = sqlx::query("SELECT key, value FROM index_meta")
        .fetch_all(pool)
        .await?
        .into_iter()
        .map(|row| -> Result<(String, String), sqlx::Error> {
            Ok((row.try_get("key")?, row.try_get("value")?))
        })
        .collect::<Result<_, sqlx::Error>>()?;

    let field = |key: &str| {
        meta.get(key)
            .cloned()
            .ok_or_else(|| IndexError::Corrupt(format!("missing metadata '{}'", key)))
    };
    let version = field("format_version")?;
    if version != FORMAT_VERSION {
        return Err(IndexError::Corrupt(format!(
            "unsupported format version {}",
            version
        )));
    }
    let metric = field("metric")?;
    if metric != METRIC {
        return Err(IndexError::Corrupt(format!("unsupported metric {}", metric)));
    }
    let embedding_model = field("embedding_model")?;
    let dims: usize = field("dims")?
        .parse()
        .map_err(|_| IndexError::Corrupt("dims is not a number".to_string()))?;

    let rows = sqlx::query(
        "SELECT chunk_id, source, doc_type, page, chunk_index, text, hash, vector FROM entries ORDER BY position",
    )
    .fetch_all(pool)
    .await?;

    let mut index = VectorIndex::new(embedding_model, dims);
    for row in rows {
        let doc_type: String = row.try_get("doc_type")?;
        let kind = FileKind::from_tag(&doc_type)
            .ok_or_else(|| IndexError::Corrupt(format!("unknown document type '{}'", doc_type)))?;
        let page: Option<i64> = row.try_get("page")?;
        let blob: Vec<u8> = row.try_get("vector")?;
        let chunk = Chunk {
            id: row.try_get("chunk_id")?,
            text: row.try_get("text")?,
            metadata: DocumentMetadata {
                source: row.try_get("source")?,
                kind,
                page: page.map(|p| p as u32),
            },
            chunk_index: row.try_get("chunk_index")?,
            hash: row.try_get("hash")?,
        };
        index
            .add(chunk, blob_to_vec(&blob))
            .map_err(|e| IndexError::Corrupt(e.to_string()))?;
    }

    let expected: usize = field("entry_count")?
        .parse()
        .map_err(|_| IndexError::Corrupt("entry_count is not a number".to_string()))?;
    if expected != index.len() {
        return Err(IndexError::Corrupt(format!(
            "expected {} entries, found {}",
            expected,
            index.len()
        )));
    }
    Ok(index)
}

/// A fresh sibling of `dir` to build the next index in.
fn staging_dir(dir: &Path) -> PathBuf {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    let staged = format!(".{}.staging-{}", name, uuid::Uuid::new_v4());
    match dir.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join(staged),
        _ => PathBuf::from(staged),
    }
}
