use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};

use super::{is_user_scoped, ArtifactScope, ArtifactService, ArtifactVersion};
use crate::error::ArborError;
use crate::types::Part;

#[derive(Debug, Clone)]
struct StoredArtifact {
    part: Part,
    meta: ArtifactVersion,
}

/// Process-local [`ArtifactService`].
#[derive(Debug, Default)]
pub struct InMemoryArtifactService {
    artifacts: Mutex<HashMap<String, Vec<StoredArtifact>>>,
}

fn payload(part: &Part) -> Result<(&[u8], Option<String>), ArborError> {
    match part {
        Part::Text { text } => Ok((text.as_bytes(), Some("text/plain".to_string()))),
        Part::InlineData(blob) => Ok((&blob.data, Some(blob.mime_type.clone()))),
        _ => Err(ArborError::InvalidArgument(
            "artifacts hold text or inline data only".into(),
        )),
    }
}

impl InMemoryArtifactService {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<StoredArtifact>>> {
        self.artifacts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ArtifactService for InMemoryArtifactService {
    async fn save(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        part: Part,
    ) -> Result<i64, ArborError> {
        let (bytes, mime_type) = payload(&part)?;
        let sha256 = format!("{:x}", Sha256::digest(bytes));
        let size = bytes.len();

        let mut artifacts = self.lock();
        let versions = artifacts.entry(scope.path(filename)).or_default();
        let version = versions.len() as i64;
        versions.push(StoredArtifact {
            meta: ArtifactVersion {
                version,
                sha256,
                mime_type,
                size,
                saved_at: Utc::now(),
            },
            part,
        });
        Ok(version)
    }

    async fn load(
        &self,
        scope: &ArtifactScope,
        filename: &str,
        version: Option<i64>,
    ) -> Result<Part, ArborError> {
        let artifacts = self.lock();
        let versions = artifacts
            .get(&scope.path(filename))
            .ok_or_else(|| ArborError::ArtifactNotFound(filename.to_string()))?;
        let stored = match version {
            Some(v) => versions.iter().find(|a| a.meta.version == v),
            None => versions.last(),
        };
        stored
            .map(|a| a.part.clone())
            .ok_or_else(|| match version {
                Some(v) => ArborError::ArtifactNotFound(format!("{filename}@{v}")),
                None => ArborError::ArtifactNotFound(filename.to_string()),
            })
    }

    async fn list(&self, scope: &ArtifactScope) -> Result<Vec<String>, ArborError> {
        let session_prefix = scope.path("");
        let user_prefix = scope.path("user:");
        let user_prefix = user_prefix.trim_end_matches("user:");
        let mut names: Vec<String> = self
            .lock()
            .iter()
            .filter(|(_, versions)| !versions.is_empty())
            .filter_map(|(path, _)| {
                path.strip_prefix(&session_prefix)
                    .or_else(|| path.strip_prefix(user_prefix).filter(|f| is_user_scoped(f)))
                    .map(str::to_string)
            })
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn delete(&self, scope: &ArtifactScope, filename: &str) -> Result<(), ArborError> {
        self.lock().remove(&scope.path(filename));
        Ok(())
    }

    async fn versions(
        &self,
        scope: &ArtifactScope,
        filename: &str,
    ) -> Result<Vec<ArtifactVersion>, ArborError> {
        Ok(self
            .lock()
            .get(&scope.path(filename))
            .map(|versions| versions.iter().map(|a| a.meta.clone()).collect())
            .unwrap_or_default())
    }
}
