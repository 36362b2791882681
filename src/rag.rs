//! Question answering over the persisted index.
//!
//! Flow for one question:
//!
//! 1. Load the index; if there is none, answer [`Answer::NotReady`].
//! 2. Check the query embedder matches the one the index was built with.
//! 3. Embed the question and take the `top_k` closest chunks.
//! 4. Concatenate their text, closest first, into a context block.
//! 5. Send the fixed system prompt plus a user turn built by
//!    [`build_messages`] to the chat model and return its reply verbatim.
//!
//! Answering never modifies the index.

use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::index::{IndexError, SearchHit, VectorIndex};
use crate::llm::{ChatMessage, ChatModel};
use crate::models::DocumentMetadata;

/// Shown instead of an answer when no index has been built yet.
pub const NOT_READY_MESSAGE: &str = "Please process documents first!";

/// Fixed instructions sent as the system message on every call.
pub const SYSTEM_PROMPT: &str = "
You are a data analysis assistant.

When calculating averages:
- Use only the explicitly mentioned column.
- Do NOT use Total_Amount unless asked.
- Do NOT weight by Quantity unless asked.
- Treat each row as one independent record.
- Do not assume business logic that is not stated.
";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Answer {
    NotReady,
    Generated {
        text: String,
        sources: Vec<SourceRef>,
    },
}

impl Answer {
    /// What the user sees.
    pub fn text(&self) -> &str {
        match self {
            Answer::NotReady => NOT_READY_MESSAGE,
            Answer::Generated { text, .. } => text,
        }
    }
}

/// A retrieved chunk as reported alongside an answer.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    #[serde(flatten)]
    pub metadata: DocumentMetadata,
    pub chunk_index: i64,
    pub score: f32,
}

impl From<&SearchHit> for SourceRef {
    fn from(hit: &SearchHit) -> Self {
        Self {
            metadata: hit.chunk.metadata.clone(),
            chunk_index: hit.chunk.chunk_index,
            score: hit.score,
        }
    }
}

/// Each retrieved chunk's text followed by a blank line, in rank order.
pub fn build_context(hits: &[SearchHit]) -> String {
    let mut context = String::new();
    for hit in hits {
        context.push_str(&hit.chunk.text);
        context.push_str("\n\n");
    }
    context
}

/// System message plus the user turn. Context and question are inserted in
/// a single pass, so placeholder-like text in either is left alone.
pub fn build_messages(context: &str, question: &str) -> Vec<ChatMessage> {
    let user = format!(
        "Use only the context below to answer the question.\n\nCONTEXT:\n{context}\n\nQUESTION: {question}\n\nANSWER:"
    );
    vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)]
}

pub struct RagChain {
    config: Config,
    embedder: Arc<dyn Embedder>,
    chat_model: Arc<dyn ChatModel>,
}

impl RagChain {
    pub fn new(config: Config, embedder: Arc<dyn Embedder>, chat_model: Arc<dyn ChatModel>) -> Self {
        Self {
            config,
            embedder,
            chat_model,
        }
    }

    /// The persisted index, or `None` if nothing has been processed yet.
    pub async fn load_vectorstore(&self) -> Result<Option<VectorIndex>> {
        match VectorIndex::load(&self.config.index.dir).await {
            Ok(index) => Ok(Some(index)),
            Err(IndexError::NotFound(path)) => {
                tracing::info!(path = %path.display(), "no index found");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// The `top_k` chunks closest to `question`.
    pub async fn retrieve(&self, index: &VectorIndex, question: &str) -> Result<Vec<SearchHit>> {
        index.ensure_compatible(self.embedder.as_ref())?;
        let query = self
            .embedder
            .embed_query(question)
            .await
            .context("Failed to embed question")?;
        Ok(index.search(&query, self.config.retrieval.top_k))
    }

    pub async fn answer_question(&self, question: &str) -> Result<Answer> {
        let Some(index) = self.load_vectorstore().await? else {
            return Ok(Answer::NotReady);
        };

        let hits = self.retrieve(&index, question).await?;
        tracing::debug!(hits = hits.len(), "retrieved context");

        let context = build_context(&hits);
        let messages = build_messages(&context, question);
        let text = self.chat_model.generate(&messages).await?;

        Ok(Answer::Generated {
            text,
            sources: hits.iter().map(SourceRef::from).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::indexer::create_vectorstore;
    use crate::models::{Document, FileKind};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Records the prompt it was given and replies with a fixed string.
    struct RecordingModel {
        seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    #[async_trait]
    impl ChatModel for RecordingModel {
        fn model_name(&self) -> &str {
            "recording"
        }
        async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
            self.seen.lock().unwrap().push(messages.to_vec());
            Ok("recorded".to_string())
        }
    }

    struct FailingModel;

    #[async_trait]
    impl ChatModel for FailingModel {
        fn model_name(&self) -> &str {
            "failing"
        }
        async fn generate(&self, _messages: &[ChatMessage]) -> Result<String> {
            anyhow::bail!("connection refused")
        }
    }

    fn recording() -> Arc<RecordingModel> {
        Arc::new(RecordingModel {
            seen: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn user_turn_uses_literal_template() {
        let messages = build_messages("ctx\n\n", "Why?");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], ChatMessage::system(SYSTEM_PROMPT));
        assert_eq!(
            messages[1].content,
            "Use only the context below to answer the question.\n\nCONTEXT:\nctx\n\n\n\nQUESTION: Why?\n\nANSWER:"
        );
    }

    #[test]
    fn braces_in_context_do_not_capture_the_question() {
        let messages = build_messages("Use f\"{question}\" in templates.\n\n", "What is X?");
        let user = &messages[1].content;
        assert!(user.contains("CONTEXT:\nUse f\"{question}\" in templates.\n\n"));
        assert!(user.ends_with("QUESTION: What is X?\n\nANSWER:"));

        let messages = build_messages("plain\n\n", "What does {context} mean?");
        assert!(messages[1]
            .content
            .ends_with("QUESTION: What does {context} mean?\n\nANSWER:"));
    }

    #[test]
    fn system_prompt_carries_column_rules() {
        assert!(SYSTEM_PROMPT.contains("You are a data analysis assistant."));
        assert!(SYSTEM_PROMPT.contains("- Do NOT use Total_Amount unless asked."));
        assert!(SYSTEM_PROMPT.contains("- Treat each row as one independent record."));
    }

    #[tokio::test]
    async fn not_ready_without_index() {
        let tmp = tempfile::TempDir::new().unwrap();
        let model = recording();
        let chain = RagChain::new(
            Config::in_dir(tmp.path()),
            Arc::new(HashingEmbedder::default()),
            model.clone(),
        );
        let answer = chain.answer_question("anything?").await.unwrap();
        assert!(matches!(answer, Answer::NotReady));
        assert_eq!(answer.text(), "Please process documents first!");
        assert!(model.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn context_is_ranked_and_blank_line_separated() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::in_dir(tmp.path());
        let embedder = Arc::new(HashingEmbedder::default());
        let docs: Vec<Document> = [
            "The sky is blue.",
            "Grass is green.",
            "Coal is black.",
            "Snow is white.",
        ]
        .iter()
        .map(|t| Document::new(*t, "colors.txt", FileKind::Text))
        .collect();
        create_vectorstore(&config, embedder.as_ref(), &docs)
            .await
            .unwrap();

        let model = recording();
        let chain = RagChain::new(config, embedder, model.clone());
        let answer = chain.answer_question("The sky is blue.").await.unwrap();
        let Answer::Generated { text, sources } = answer else {
            panic!("expected generated answer");
        };
        assert_eq!(text, "recorded");
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].metadata.source, "colors.txt");

        let seen = model.seen.lock().unwrap();
        let user = &seen[0][1].content;
        assert!(user.contains("CONTEXT:\nThe sky is blue.\n\n"));
        assert!(user.ends_with("QUESTION: The sky is blue.\n\nANSWER:"));
    }

    #[tokio::test]
    async fn model_failure_propagates() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::in_dir(tmp.path());
        let embedder = Arc::new(HashingEmbedder::default());
        let docs = [Document::new("some text", "a.txt", FileKind::Text)];
        create_vectorstore(&config, embedder.as_ref(), &docs)
            .await
            .unwrap();

        let chain = RagChain::new(config, embedder, Arc::new(FailingModel));
        let err = chain.answer_question("q").await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn different_embedder_is_refused() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = Config::in_dir(tmp.path());
        let docs = [Document::new("some text", "a.txt", FileKind::Text)];
        create_vectorstore(&config, &HashingEmbedder::new(64), &docs)
            .await
            .unwrap();

        let model = recording();
        let chain = RagChain::new(config, Arc::new(HashingEmbedder::new(32)), model.clone());
        let err = chain.answer_question("q").await.unwrap_err();
        assert!(err.to_string().contains("hashing-64"));
        assert!(model.seen.lock().unwrap().is_empty());
    }
}
