//! Long-term memory: ingest finished sessions, search them later.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ArborError;
use crate::session::Session;
use crate::types::Content;

/// One remembered message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub content: Content,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchMemoryResponse {
    /// Best match first.
    pub memories: Vec<MemoryEntry>,
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Ingest every text-bearing event of a session. Re-adding a session
    /// replaces what was stored for it.
    async fn add_session(&self, session: &Session) -> Result<(), ArborError>;

    /// Entries of the user's sessions ranked by relevance to `query`.
    async fn search(
        &self,
        app_name: &str,
        user_id: &str,
        query: &str,
    ) -> Result<SearchMemoryResponse, ArborError>;
}

#[derive(Debug, Clone)]
struct IndexedEntry {
    entry: MemoryEntry,
    words: HashSet<String>,
}

type UserKey = (String, String);

/// Keyword-overlap [`MemoryService`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryMemoryService {
    sessions: RwLock<HashMap<UserKey, HashMap<String, Vec<IndexedEntry>>>>,
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl InMemoryMemoryService {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn add_session(&self, session: &Session) -> Result<(), ArborError> {
        let entries: Vec<IndexedEntry> = session
            .events
            .iter()
            .filter_map(|event| {
                let content = event.content.as_ref()?;
                let text = content.text();
                if text.trim().is_empty() {
                    return None;
                }
                Some(IndexedEntry {
                    words: words(&text),
                    entry: MemoryEntry {
                        content: content.clone(),
                        author: event.author.clone(),
                        timestamp: event.timestamp,
                    },
                })
            })
            .collect();
        debug!(session_id = %session.id, entries = entries.len(), "session added to memory");
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry((session.app_name.clone(), session.user_id.clone()))
            .or_default()
            .insert(session.id.clone(), entries);
        Ok(())
    }

    async fn search(
        &self,
        app_name: &str,
        user_id: &str,
        query: &str,
    ) -> Result<SearchMemoryResponse, ArborError> {
        let query_words = words(query);
        if query_words.is_empty() {
            return Ok(SearchMemoryResponse::default());
        }
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        let Some(by_session) = sessions.get(&(app_name.to_string(), user_id.to_string())) else {
            return Ok(SearchMemoryResponse::default());
        };

        let mut scored: Vec<(usize, &MemoryEntry)> = by_session
            .values()
            .flatten()
            .filter_map(|indexed| {
                let score = indexed.words.intersection(&query_words).count();
                (score > 0).then_some((score, &indexed.entry))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.timestamp.cmp(&a.1.timestamp)));

        Ok(SearchMemoryResponse {
            memories: scored.into_iter().map(|(_, entry)| entry.clone()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Event;
    use crate::state::State;

    fn session(id: &str, texts: &[(&str, &str)]) -> Session {
        Session {
            id: id.to_string(),
            app_name: "app".into(),
            user_id: "u1".into(),
            state: State::new(),
            events: texts
                .iter()
                .map(|(author, text)| {
                    Event::new("inv", *author).with_content(Content::user(*text))
                })
                .collect(),
            last_update_time: Utc::now(),
        }
    }

    #[tokio::test]
    async fn search_ranks_by_keyword_overlap() {
        let memory = InMemoryMemoryService::new();
        memory
            .add_session(&session(
                "s1",
                &[
                    ("user", "My favourite colour is blue"),
                    ("agent", "Noted, blue it is"),
                    ("user", "I live in Oslo"),
                ],
            ))
            .await
            .unwrap();

        let found = memory
            .search("app", "u1", "what is my favourite colour?")
            .await
            .unwrap();
        assert_eq!(found.memories[0].content.text(), "My favourite colour is blue");
        assert!(found
            .memories
            .iter()
            .all(|m| m.content.text() != "I live in Oslo"));

        let other_user = memory.search("app", "u2", "colour").await.unwrap();
        assert!(other_user.memories.is_empty());
    }

    #[tokio::test]
    async fn re_adding_a_session_replaces_it() {
        let memory = InMemoryMemoryService::new();
        memory
            .add_session(&session("s1", &[("user", "alpha")]))
            .await
            .unwrap();
        memory
            .add_session(&session("s1", &[("user", "beta")]))
            .await
            .unwrap();
        assert!(memory.search("app", "u1", "alpha").await.unwrap().memories.is_empty());
        assert_eq!(memory.search("app", "u1", "beta").await.unwrap().memories.len(), 1);
    }
}
