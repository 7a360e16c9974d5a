//! Sessions: conversation state and event history per (app, user, session).

mod in_memory;

pub use in_memory::InMemorySessionService;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArborError;
use crate::event::Event;
use crate::state::{State, StateDelta};

/// A conversation: ordered events plus the merged state visible to it.
///
/// `state` merges app-, user- and session-scoped keys. On an in-flight copy
/// held by a run it also carries that run's `temp:` keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub app_name: String,
    pub user_id: String,
    pub state: State,
    pub events: Vec<Event>,
    pub last_update_time: DateTime<Utc>,
}

impl Session {
    /// Apply a committed event to this copy: full delta (temp included) into
    /// state, the persisted form of the event into history.
    pub(crate) fn absorb(&mut self, applied: &StateDelta, persisted: Event) {
        self.state.apply_delta(applied);
        self.last_update_time = persisted.timestamp;
        self.events.push(persisted);
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateSessionRequest {
    pub app_name: String,
    pub user_id: String,
    /// Generated when absent.
    pub session_id: Option<String>,
    pub state: StateDelta,
}

impl CreateSessionRequest {
    pub fn new(app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_state(mut self, state: StateDelta) -> Self {
        self.state = state;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct GetSessionRequest {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
    /// Keep only the N most recent events.
    pub num_recent_events: Option<usize>,
    /// Keep only events at or after this instant.
    pub after: Option<DateTime<Utc>>,
}

impl GetSessionRequest {
    pub fn new(
        app_name: impl Into<String>,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
            session_id: session_id.into(),
            ..Default::default()
        }
    }

    pub fn with_num_recent_events(mut self, n: usize) -> Self {
        self.num_recent_events = Some(n);
        self
    }

    pub fn with_after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }
}

/// Storage for sessions and their scoped state.
///
/// Implementations must serialize `append_event` per session: at most one
/// append is in flight for a given session at any time.
#[async_trait]
pub trait SessionService: Send + Sync {
    async fn create(&self, request: CreateSessionRequest) -> Result<Session, ArborError>;

    /// Fails with [`ArborError::SessionNotFound`] for unknown sessions.
    async fn get(&self, request: GetSessionRequest) -> Result<Session, ArborError>;

    /// Sessions of one user, without their events.
    async fn list(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>, ArborError>;

    async fn delete(&self, app_name: &str, user_id: &str, session_id: &str)
        -> Result<(), ArborError>;

    /// Commit an event: persist it without `temp:` keys, merge scoped keys
    /// into their stores, and update the caller's in-flight `session`.
    ///
    /// Partial events are returned untouched and never stored. Returns the
    /// persisted form of the event.
    async fn append_event(&self, session: &mut Session, event: Event)
        -> Result<Event, ArborError>;
}
