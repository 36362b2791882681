//! Upload ingestion.
//!
//! Turns a batch of uploaded files into [`Document`]s. Each upload is
//! written to a scratch file, handed to the extractor for its format, and
//! the scratch file is removed again whatever the outcome. One bad file
//! never aborts the batch: unsupported formats are skipped with a warning
//! and extraction failures are logged and skipped.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::Config;
use crate::models::{Document, FileKind};

/// An uploaded file: its client-side name and raw bytes.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Upload {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Read a file from disk as an upload named after its file name.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::new(display_name(path), bytes))
    }

    pub fn kind(&self) -> Option<FileKind> {
        FileKind::from_file_name(&self.name)
    }
}

/// Final path component of `path`, or the whole path if it has none.
fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

/// Extract documents from every upload, skipping what cannot be read.
pub async fn load_documents(config: &Config, uploads: &[Upload]) -> Vec<Document> {
    let mut documents = Vec::new();

    for upload in uploads {
        let name = display_name(Path::new(&upload.name));
        let Some(kind) = FileKind::from_file_name(&name) else {
            tracing::warn!(file = %name, "unsupported file type, skipping");
            continue;
        };

        match load_one(&config.ingest.scratch_dir, &name, kind, &upload.bytes).await {
            Ok(docs) => {
                tracing::info!(file = %name, documents = docs.len(), "loaded");
                documents.extend(docs);
            }
            Err(e) => {
                tracing::error!(file = %name, error = %format!("{:#}", e), "failed to load");
            }
        }
    }

    tracing::info!(total = documents.len(), "documents loaded");
    documents
}

async fn load_one(
    scratch_dir: &Path,
    name: &str,
    kind: FileKind,
    bytes: &[u8],
) -> Result<Vec<Document>> {
    let mut scratch = tempfile::Builder::new()
        .prefix("temp_")
        .suffix(&format!("_{}", name))
        .tempfile_in(scratch_dir)
        .with_context(|| format!("Failed to create scratch file in {}", scratch_dir.display()))?;
    scratch.write_all(bytes)?;
    scratch.flush()?;

    let path: PathBuf = scratch.path().to_path_buf();
    let source = name.to_string();
    let extracted =
        tokio::task::spawn_blocking(move || kind.extractor().extract(&source, &path)).await;

    // The scratch file is removed here, before any result is inspected.
    drop(scratch);

    let docs = extracted.context("extractor panicked")??;
    Ok(docs)
}
