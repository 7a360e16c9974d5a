//! Configuration (layered: code > file > env).

mod run;

pub use run::{RunConfig, RunSettings};

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ArborError;

/// Layered configuration for arbor.
///
/// Credentials and endpoints of model capabilities plus default
/// [`RunConfig`] values. Later layers override earlier ones:
/// 1. environment (and `.env`) via [`ArborConfig::from_env`]
/// 2. a TOML file via [`ArborConfig::merge_toml_str`] / [`ArborConfig::load`]
/// 3. explicit setters
#[derive(Clone, Default)]
pub struct ArborConfig {
    api_keys: Arc<RwLock<HashMap<String, String>>>,
    base_urls: Arc<RwLock<HashMap<String, String>>>,
    run: Arc<RwLock<RunSettings>>,
}

impl fmt::Debug for ArborConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let providers: Vec<String> = self
            .api_keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ArborConfig")
            .field("api_keys", &providers)
            .field("base_urls", &self.base_urls)
            .field("run", &self.run)
            .finish()
    }
}

/// On-disk shape of a config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct ConfigFile {
    api_keys: HashMap<String, String>,
    base_urls: HashMap<String, String>,
    run: RunSettings,
}

impl ArborConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from environment variables (`GOOGLE_API_KEY`, `GEMINI_BASE_URL`, ...).
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv(); // .env is optional
        let config = Self::new();

        let env_mappings = [("GOOGLE_API_KEY", "google"), ("GEMINI_API_KEY", "google")];
        for (env_var, provider) in &env_mappings {
            if let Ok(key) = std::env::var(env_var) {
                config.set_api_key(provider, key);
            }
        }

        let url_mappings = [("GEMINI_BASE_URL", "google"), ("ARBOR_REMOTE_BASE_URL", "remote")];
        for (env_var, provider) in &url_mappings {
            if let Ok(url) = std::env::var(env_var) {
                config.set_base_url(provider, url);
            }
        }

        if let Ok(raw) = std::env::var("ARBOR_MAX_LLM_CALLS") {
            if let Ok(limit) = raw.parse() {
                config.write_run(|run| run.max_llm_calls = Some(limit));
            }
        }
        if let Ok(raw) = std::env::var("ARBOR_STREAMING_MODE") {
            if let Ok(mode) = raw.parse() {
                config.write_run(|run| run.streaming_mode = Some(mode));
            }
        }

        config
    }

    /// Parse a TOML document into a fresh config.
    pub fn from_toml_str(raw: &str) -> Result<Self, ArborError> {
        let config = Self::new();
        config.merge_toml_str(raw)?;
        Ok(config)
    }

    /// Overlay a TOML document on this config.
    pub fn merge_toml_str(&self, raw: &str) -> Result<(), ArborError> {
        let file: ConfigFile = toml::from_str(raw)
            .map_err(|e| ArborError::Configuration(format!("invalid config file: {e}")))?;
        for (provider, key) in file.api_keys {
            self.set_api_key(&provider, key);
        }
        for (provider, url) in file.base_urls {
            self.set_base_url(&provider, url);
        }
        self.write_run(|run| {
            let overlay = file.run;
            run.streaming_mode = overlay.streaming_mode.or(run.streaming_mode);
            run.max_llm_calls = overlay.max_llm_calls.or(run.max_llm_calls);
            run.model_timeout_ms = overlay.model_timeout_ms.or(run.model_timeout_ms);
            run.tool_timeout_ms = overlay.tool_timeout_ms.or(run.tool_timeout_ms);
            run.remote_timeout_ms = overlay.remote_timeout_ms.or(run.remote_timeout_ms);
            run.save_input_blobs_as_artifacts = overlay
                .save_input_blobs_as_artifacts
                .or(run.save_input_blobs_as_artifacts);
        });
        Ok(())
    }

    /// Environment first, then the file at `path` if it exists.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ArborError> {
        let path = path.as_ref();
        let config = Self::from_env();
        match std::fs::read_to_string(path) {
            Ok(raw) => {
                config.merge_toml_str(&raw)?;
                debug!(path = %path.display(), "loaded config file");
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        Ok(config)
    }

    /// [`ArborConfig::load`] from [`default_config_path`].
    pub fn load_default() -> Result<Self, ArborError> {
        Self::load(default_config_path())
    }

    pub fn set_api_key(&self, provider: &str, key: String) {
        self.api_keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.to_string(), key);
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        self.api_keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()
    }

    pub fn set_base_url(&self, provider: &str, url: String) {
        self.base_urls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.to_string(), url);
    }

    pub fn get_base_url(&self, provider: &str) -> Option<String> {
        self.base_urls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()
    }

    pub fn has_credentials(&self, provider: &str) -> bool {
        self.get_api_key(provider).is_some()
    }

    /// Default run options derived from env and file layers.
    pub fn run_config(&self) -> RunConfig {
        RunConfig::from(&*self.run.read().unwrap_or_else(PoisonError::into_inner))
    }

    fn write_run(&self, f: impl FnOnce(&mut RunSettings)) {
        f(&mut self.run.write().unwrap_or_else(PoisonError::into_inner));
    }
}

/// `~/.arbor/config.toml`, or a relative `.arbor/config.toml` without a home.
pub fn default_config_path() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".arbor"))
        .unwrap_or_else(|| PathBuf::from(".arbor"))
        .join("config.toml")
}
