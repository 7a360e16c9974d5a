use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use super::{CreateSessionRequest, GetSessionRequest, Session, SessionService};
use crate::error::ArborError;
use crate::event::Event;
use crate::state::{strip_temp, ScopedDelta, State};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SessionKey {
    app_name: String,
    user_id: String,
    session_id: String,
}

impl SessionKey {
    fn new(app_name: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }
}

/// Session-scoped half of a stored session.
#[derive(Debug)]
struct StoredSession {
    state: State,
    events: Vec<Event>,
    last_update_time: chrono::DateTime<Utc>,
}

type SessionSlot = Arc<tokio::sync::Mutex<StoredSession>>;

/// Process-local [`SessionService`].
///
/// Each session sits behind its own async mutex so concurrent appends on one
/// session are serialized while different sessions proceed independently.
#[derive(Debug, Default)]
pub struct InMemorySessionService {
    sessions: Mutex<HashMap<SessionKey, SessionSlot>>,
    user_state: RwLock<HashMap<(String, String), State>>,
    app_state: RwLock<HashMap<String, State>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl InMemorySessionService {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &SessionKey) -> Result<SessionSlot, ArborError> {
        lock(&self.sessions)
            .get(key)
            .cloned()
            .ok_or_else(|| ArborError::SessionNotFound {
                app_name: key.app_name.clone(),
                user_id: key.user_id.clone(),
                session_id: key.session_id.clone(),
            })
    }

    /// App + user + session keys, later scopes shadowing earlier ones.
    fn merged_state(&self, key: &SessionKey, session_state: &State) -> State {
        let mut merged = State::new();
        if let Some(app) = self
            .app_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key.app_name)
        {
            merged.apply_delta(&app.to_map());
        }
        if let Some(user) = self
            .user_state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(key.app_name.clone(), key.user_id.clone()))
        {
            merged.apply_delta(&user.to_map());
        }
        merged.apply_delta(&session_state.to_map());
        merged
    }

    fn merge_scoped(&self, key: &SessionKey, scoped: &ScopedDelta) {
        if !scoped.app.is_empty() {
            self.app_state
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.app_name.clone())
                .or_default()
                .apply_delta(&scoped.app);
        }
        if !scoped.user.is_empty() {
            self.user_state
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry((key.app_name.clone(), key.user_id.clone()))
                .or_default()
                .apply_delta(&scoped.user);
        }
    }

    fn snapshot(&self, key: &SessionKey, stored: &StoredSession, events: Vec<Event>) -> Session {
        Session {
            id: key.session_id.clone(),
            app_name: key.app_name.clone(),
            user_id: key.user_id.clone(),
            state: self.merged_state(key, &stored.state),
            events,
            last_update_time: stored.last_update_time,
        }
    }
}

#[async_trait]
impl SessionService for InMemorySessionService {
    async fn create(&self, request: CreateSessionRequest) -> Result<Session, ArborError> {
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let key = SessionKey::new(&request.app_name, &request.user_id, &session_id);

        let scoped = ScopedDelta::split(&request.state);
        let mut session_state = State::new();
        session_state.apply_delta(&scoped.session);
        let stored = StoredSession {
            state: session_state,
            events: Vec::new(),
            last_update_time: Utc::now(),
        };

        {
            let mut sessions = lock(&self.sessions);
            if sessions.contains_key(&key) {
                return Err(ArborError::SessionExists(session_id));
            }
            self.merge_scoped(&key, &scoped);
            let session = self.snapshot(&key, &stored, Vec::new());
            sessions.insert(key, Arc::new(tokio::sync::Mutex::new(stored)));
            debug!(
                app = %session.app_name,
                user = %session.user_id,
                session_id = %session.id,
                "session created"
            );
            Ok(session)
        }
    }

    async fn get(&self, request: GetSessionRequest) -> Result<Session, ArborError> {
        let key = SessionKey::new(&request.app_name, &request.user_id, &request.session_id);
        let slot = self.slot(&key)?;
        let stored = slot.lock().await;

        let mut events: Vec<Event> = match request.after {
            Some(after) => stored
                .events
                .iter()
                .filter(|event| event.timestamp >= after)
                .cloned()
                .collect(),
            None => stored.events.clone(),
        };
        if let Some(n) = request.num_recent_events {
            let skip = events.len().saturating_sub(n);
            events.drain(..skip);
        }
        Ok(self.snapshot(&key, &stored, events))
    }

    async fn list(&self, app_name: &str, user_id: &str) -> Result<Vec<Session>, ArborError> {
        let slots: Vec<(SessionKey, SessionSlot)> = lock(&self.sessions)
            .iter()
            .filter(|(key, _)| key.app_name == app_name && key.user_id == user_id)
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();

        let mut sessions = Vec::with_capacity(slots.len());
        for (key, slot) in slots {
            let stored = slot.lock().await;
            sessions.push(self.snapshot(&key, &stored, Vec::new()));
        }
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(sessions)
    }

    async fn delete(
        &self,
        app_name: &str,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), ArborError> {
        let key = SessionKey::new(app_name, user_id, session_id);
        lock(&self.sessions).remove(&key);
        debug!(app = app_name, user = user_id, session_id, "session deleted");
        Ok(())
    }

    async fn append_event(
        &self,
        session: &mut Session,
        event: Event,
    ) -> Result<Event, ArborError> {
        if event.partial {
            return Ok(event);
        }
        let key = SessionKey::new(&session.app_name, &session.user_id, &session.id);
        let slot = self.slot(&key)?;
        let mut stored = slot.lock().await;

        let applied = event.actions.state_delta.clone();
        let mut persisted = event;
        persisted.actions.state_delta = strip_temp(&applied);

        let scoped = ScopedDelta::split(&persisted.actions.state_delta);
        stored.state.apply_delta(&scoped.session);
        self.merge_scoped(&key, &scoped);
        stored.events.push(persisted.clone());
        stored.last_update_time = persisted.timestamp;

        session.absorb(&applied, persisted.clone());
        debug!(
            session_id = %session.id,
            event_id = %persisted.id,
            author = %persisted.author,
            delta_keys = applied.len(),
            "event committed"
        );
        Ok(persisted)
    }
}
