//! Index building: documents → chunks → embeddings → persisted index.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::chunk::TextSplitter;
use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::VectorIndex;
use crate::models::Document;

/// What a successful build wrote.
#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub documents: usize,
    pub chunks: usize,
    pub dims: usize,
    pub embedding_model: String,
    pub path: PathBuf,
}

/// Chunk and embed `documents`, then replace the persisted index with the
/// result.
///
/// Returns `Ok(None)` without touching the index directory when there is
/// nothing to index.
pub async fn create_vectorstore(
    config: &Config,
    embedder: &dyn Embedder,
    documents: &[Document],
) -> Result<Option<IndexSummary>> {
    if documents.is_empty() {
        tracing::warn!("no documents to index");
        return Ok(None);
    }

    let chunks = TextSplitter::from_config(&config.chunking).split_documents(documents);
    tracing::info!(
        documents = documents.len(),
        chunks = chunks.len(),
        "documents split into chunks"
    );
    if chunks.is_empty() {
        tracing::warn!("documents produced no chunks, index left unchanged");
        return Ok(None);
    }

    let mut index = VectorIndex::for_embedder(embedder);
    let batch_size = config.embedding.batch_size.max(1);
    for batch in chunks.chunks(batch_size) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder
            .embed(&texts)
            .await
            .context("Failed to embed chunks")?;
        if vectors.len() != batch.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} chunks",
                vectors.len(),
                batch.len()
            );
        }
        for (chunk, vector) in batch.iter().zip(vectors) {
            index.add(chunk.clone(), vector)?;
        }
    }

    let path = config.index.dir.clone();
    index
        .save(&path)
        .await
        .with_context(|| format!("Failed to write index to {}", path.display()))?;
    tracing::info!(entries = index.len(), path = %path.display(), "index written");

    Ok(Some(IndexSummary {
        documents: documents.len(),
        chunks: index.len(),
        dims: index.dims(),
        embedding_model: index.embedding_model().to_string(),
        path,
    }))
}
