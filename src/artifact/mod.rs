//! Versioned binary artifacts scoped like state.
//!
//! A filename starting with `user:` is shared by every session of the user;
//! any other filename belongs to one session.

mod in_memory;

pub use in_memory::InMemoryArtifactService;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ArborError;
use crate::state::USER_PREFIX;
use crate::types::Part;

/// The session an artifact call is made from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactScope {
    pub app_name: String,
    pub user_id: String,
    pub session_id: String,
}

impl ArtifactScope {
    pub fn new(app_name: &str, user_id: &str, session_id: &str) -> Self {
        Self {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    /// Storage path of `filename` within this scope.
    pub fn path(&self, filename: &str) -> String {
        if is_user_scoped(filename) {
            format!("{}/{}/user/{}", self.app_name, self.user_id, filename)
        } else {
            format!(
                "{}/{}/{}/{}",
                self.app_name, self.user_id, self.session_id, filename
            )
        }
    }
}

pub fn is_user_scoped(filename: &str) -> bool {
    filename.starts_with(USER_PREFIX)
}

/// Metadata of one stored version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactVersion {
    pub version: i64,
    /// Hex SHA-256 of the payload bytes.
    pub sha256: String,
    pub mime_type: Option<String>,
    pub size: usize,
    pub saved_at: DateTime<Utc>,
}

#[async_trait]
pub trait ArtifactService: Send + Sync {
    /// Store a new version and return its number (0 for the first save).
    async fn save(&self, scope: &ArtifactScope, filename: &str, part: Part)
        -> Result<i64, ArborError>;

    /// Load a version (latest when `None`). Unknown files or versions fail
    /// with [`ArborError::ArtifactNotFound`].
    async fn load(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        version: Option<i64>,
    ) -> Result<Part, ArborError>;

    /// Filenames visible from the scope, session and user files alike, sorted.
    async fn list(&self, scope: &ArtifactScope) -> Result<Vec<String>, ArborError>;

    async fn delete(&self, scope: &ArtifactScope, filename: &str) -> Result<(), ArborError>;

    async fn versions(
        &self,
        scope: &ArtifactScope,
        filename: &str,
    ) -> Result<Vec<ArtifactVersion>, ArborError>;
}
