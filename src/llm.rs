//! Chat-completion capability for answer generation.
//!
//! [`ChatModel`] is the seam the answering chain talks to. [`GroqClient`]
//! implements it against Groq's OpenAI-compatible chat completions API.
//! A failed call is returned to the caller as-is: there is no retry, no
//! backoff and no client-side timeout.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{API_KEY_VAR, GENERATION_MODEL};

const GROQ_CHAT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// Generates a reply to an ordered list of messages.
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, messages: &[ChatMessage]) -> Result<String>;
}

pub struct GroqClient {
    client: reqwest::Client,
    api_key: String,
    url: String,
}

impl GroqClient {
    /// Fails when no API key is available.
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let Some(api_key) = api_key.filter(|k| !k.trim().is_empty()) else {
            bail!(
                "{} is not set. Export it or add it to your .env file.",
                API_KEY_VAR
            );
        };
        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            url: GROQ_CHAT_URL.to_string(),
        })
    }

    /// Point the client at another OpenAI-compatible endpoint.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Chat completion request for `messages`; `.json()` sets the content type.
    fn request(&self, messages: &[ChatMessage]) -> reqwest::RequestBuilder {
        let body = serde_json::json!({
            "model": GENERATION_MODEL,
            "messages": messages,
        });
        self.client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
    }
}

#[async_trait]
impl ChatModel for GroqClient {
    fn model_name(&self) -> &str {
        GENERATION_MODEL
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self
            .request(messages)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("Groq connection error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Groq API error {}: {}", status, body_text);
        }

        let json: serde_json::Value = response.json().await?;
        parse_chat_response(&json)
    }
}

fn parse_chat_response(json: &serde_json::Value) -> Result<String> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Invalid chat response: missing choices[0].message.content"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_fails_construction() {
        assert!(GroqClient::new(None).is_err());
        assert!(GroqClient::new(Some("  ".into())).is_err());
        assert!(GroqClient::new(Some("gsk_test".into())).is_ok());
    }

    #[test]
    fn messages_serialize_with_lowercase_roles() {
        let json = serde_json::to_value([
            ChatMessage::system("rules"),
            ChatMessage::user("question"),
        ])
        .unwrap();
        assert_eq!(json[0]["role"], "system");
        assert_eq!(json[1]["role"], "user");
        assert_eq!(json[1]["content"], "question");
    }

    #[test]
    fn request_has_single_json_content_type_and_bearer_key() {
        let client = GroqClient::new(Some("gsk_test".into()))
            .unwrap()
            .with_url("http://localhost:9/v1/chat/completions");
        let request = client
            .request(&[ChatMessage::system("rules"), ChatMessage::user("q")])
            .build()
            .unwrap();

        let content_types: Vec<_> = request
            .headers()
            .get_all(reqwest::header::CONTENT_TYPE)
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(content_types, vec!["application/json"]);
        assert_eq!(
            request.headers()["authorization"].to_str().unwrap(),
            "Bearer gsk_test"
        );

        let body: serde_json::Value =
            serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(body["model"], GENERATION_MODEL);
        assert_eq!(body["messages"][1]["content"], "q");
    }

    #[test]
    fn parses_first_choice() {
        let json = serde_json::json!({
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "The sky is blue."}}
            ]
        });
        assert_eq!(parse_chat_response(&json).unwrap(), "The sky is blue.");
    }

    #[test]
    fn rejects_response_without_choices() {
        let json = serde_json::json!({"error": {"message": "bad"}});
        assert!(parse_chat_response(&json).is_err());
        assert!(parse_chat_response(&serde_json::json!({"choices": []})).is_err());
    }
}
