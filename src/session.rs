use serde::Serialize;
use std::collections::{HashMap, VecDeque};

use crate::models::{ConversationTurn, Role};

/// Ordered chat history for one session. Lives in memory only.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Role::User, content.into());
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.push(Role::Assistant, content.into());
    }

    fn push(&mut self, role: Role, content: String) {
        self.turns.push(ConversationTurn { role, content });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

/// Transcripts keyed by session id, holding at most `capacity` of them.
/// Touching a session makes it the most recently used; inserting past the
/// capacity drops the least recently used one.
#[derive(Debug)]
pub struct SessionStore {
    capacity: usize,
    transcripts: HashMap<String, Transcript>,
    recency: VecDeque<String>,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            transcripts: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    /// The transcript for `id`, created empty if unknown.
    pub fn entry(&mut self, id: &str) -> &mut Transcript {
        if self.transcripts.contains_key(id) {
            self.touch(id);
        } else {
            while self.transcripts.len() >= self.capacity {
                let Some(oldest) = self.recency.pop_front() else {
                    break;
                };
                self.transcripts.remove(&oldest);
                tracing::debug!(session = %oldest, "evicted session");
            }
            self.recency.push_back(id.to_string());
        }
        self.transcripts.entry(id.to_string()).or_default()
    }

    pub fn get(&self, id: &str) -> Option<&Transcript> {
        self.transcripts.get(id)
    }

    /// Existing transcript only; never creates or evicts.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Transcript> {
        self.transcripts.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.transcripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transcripts.is_empty()
    }

    fn touch(&mut self, id: &str) {
        if let Some(pos) = self.recency.iter().position(|k| k == id) {
            if let Some(key) = self.recency.remove(pos) {
                self.recency.push_back(key);
            }
        }
    }
}
