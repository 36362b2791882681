//! Core data models used throughout docchat.
//!
//! These types represent the documents, chunks and conversation turns that
//! flow through the ingestion, indexing and answering pipeline.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// The closed set of upload formats the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Excel,
    Pdf,
    Word,
    Text,
}

/// Extensions accepted by the upload filter.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "xlsx", "xls", "docx", "txt"];

impl FileKind {
    /// Classify a file by its extension (case-insensitive).
    ///
    /// Returns `None` for anything outside [`SUPPORTED_EXTENSIONS`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let ext = Path::new(name)
            .extension()
            .and_then(|e| e.to_str())?
            .to_ascii_lowercase();
        match ext.as_str() {
            "xlsx" | "xls" => Some(FileKind::Excel),
            "pdf" => Some(FileKind::Pdf),
            "docx" => Some(FileKind::Word),
            "txt" => Some(FileKind::Text),
            _ => None,
        }
    }

    pub fn tag(&self) -> &'static str {
        match self {
            FileKind::Excel => "excel",
            FileKind::Pdf => "pdf",
            FileKind::Word => "word",
            FileKind::Text => "text",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "excel" => Some(FileKind::Excel),
            "pdf" => Some(FileKind::Pdf),
            "word" => Some(FileKind::Word),
            "text" => Some(FileKind::Text),
            _ => None,
        }
    }
}

/// Where a document's text came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Original upload file name.
    pub source: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    /// 0-based page number, for formats extracted page by page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
}

/// Extracted text of one uploaded file (or one page of it).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(content: impl Into<String>, source: &str, kind: FileKind) -> Self {
        Self {
            content: content.into(),
            metadata: DocumentMetadata {
                source: source.to_string(),
                kind,
                page: None,
            },
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.metadata.page = Some(page);
        self
    }
}

/// A bounded window of a document's text; the unit of embedding and retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
    /// Position of this chunk within its source document.
    pub chunk_index: i64,
    /// SHA-256 of `text`.
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_supported_extensions() {
        assert_eq!(FileKind::from_file_name("a.pdf"), Some(FileKind::Pdf));
        assert_eq!(FileKind::from_file_name("sales.XLSX"), Some(FileKind::Excel));
        assert_eq!(FileKind::from_file_name("old.xls"), Some(FileKind::Excel));
        assert_eq!(FileKind::from_file_name("memo.docx"), Some(FileKind::Word));
        assert_eq!(FileKind::from_file_name("notes.txt"), Some(FileKind::Text));
    }

    #[test]
    fn rejects_unknown_extensions() {
        assert_eq!(FileKind::from_file_name("data.csv"), None);
        assert_eq!(FileKind::from_file_name("legacy.doc"), None);
        assert_eq!(FileKind::from_file_name("README"), None);
    }

    #[test]
    fn tags_round_trip() {
        for kind in [FileKind::Excel, FileKind::Pdf, FileKind::Word, FileKind::Text] {
            assert_eq!(FileKind::from_tag(kind.tag()), Some(kind));
        }
    }

    #[test]
    fn metadata_serializes_type_tag() {
        let doc = Document::new("x", "a.txt", FileKind::Text);
        let json = serde_json::to_value(&doc.metadata).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["source"], "a.txt");
        assert!(json.get("page").is_none());
    }
}
