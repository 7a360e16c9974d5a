//! Session state and key scoping.
//!
//! Keys are namespaced by prefix:
//! - `app:` is shared by every user and session of an application,
//! - `user:` is shared by every session of one user,
//! - `temp:` lives only for the remainder of the current run,
//! - anything else belongs to the session.
//!
//! Deltas are applied last-write-wins per key, in event order.

mod template;

pub use template::inject_session_state;

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ArborError;

pub const APP_PREFIX: &str = "app:";
pub const USER_PREFIX: &str = "user:";
pub const TEMP_PREFIX: &str = "temp:";

/// A set of key updates carried by one event.
pub type StateDelta = HashMap<String, serde_json::Value>;

/// Persistence scope of a state key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    App,
    User,
    Session,
    Temp,
}

impl Scope {
    /// Resolve the scope of a key. Unrecognized prefixes are session-scoped.
    pub fn of(key: &str) -> Self {
        if key.starts_with(APP_PREFIX) {
            Self::App
        } else if key.starts_with(USER_PREFIX) {
            Self::User
        } else if key.starts_with(TEMP_PREFIX) {
            Self::Temp
        } else {
            Self::Session
        }
    }

    pub fn is_persistent(self) -> bool {
        !matches!(self, Self::Temp)
    }
}

/// A delta partitioned by scope.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopedDelta {
    pub app: StateDelta,
    pub user: StateDelta,
    pub session: StateDelta,
    pub temp: StateDelta,
}

impl ScopedDelta {
    pub fn split(delta: &StateDelta) -> Self {
        let mut scoped = Self::default();
        for (key, value) in delta {
            let target = match Scope::of(key) {
                Scope::App => &mut scoped.app,
                Scope::User => &mut scoped.user,
                Scope::Session => &mut scoped.session,
                Scope::Temp => &mut scoped.temp,
            };
            target.insert(key.clone(), value.clone());
        }
        scoped
    }
}

/// Drop `temp:` keys from a delta.
pub fn strip_temp(delta: &StateDelta) -> StateDelta {
    delta
        .iter()
        .filter(|(key, _)| Scope::of(key).is_persistent())
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Flat key/value view of session state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State {
    values: HashMap<String, serde_json::Value>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a key. Missing keys are an error; callers supply their own default.
    pub fn get(&self, key: &str) -> Result<&serde_json::Value, ArborError> {
        self.values
            .get(key)
            .ok_or_else(|| ArborError::StateKeyNotFound(key.to_string()))
    }

    /// Read and deserialize a key.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ArborError> {
        let value = self.get(key)?;
        serde_json::from_value(value.clone())
            .map_err(|e| ArborError::state(key, format!("unexpected value type: {e}")))
    }

    /// Read a key, falling back to `default` when missing or ill-typed.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    pub fn get_opt(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.values.remove(key)
    }

    /// Apply a delta last-write-wins.
    pub fn apply_delta(&mut self, delta: &StateDelta) {
        for (key, value) in delta {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Remove every `temp:` key.
    pub fn purge_temp(&mut self) {
        self.values.retain(|key, _| Scope::of(key).is_persistent());
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.values.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.values.keys()
    }

    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        self.values.clone()
    }
}

impl From<HashMap<String, serde_json::Value>> for State {
    fn from(values: HashMap<String, serde_json::Value>) -> Self {
        Self { values }
    }
}

impl FromIterator<(String, serde_json::Value)> for State {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
