//! Per-run options.

use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::types::StreamingMode;

/// Options for one [`Runner::run`](crate::runner::Runner::run) call.
///
/// ```
/// use std::time::Duration;
/// use arbor::config::RunConfig;
/// use arbor::types::StreamingMode;
///
/// let config = RunConfig::builder()
///     .streaming_mode(StreamingMode::Sse)
///     .max_llm_calls(20)
///     .model_timeout(Duration::from_secs(30))
///     .build();
/// assert_eq!(config.max_llm_calls, 20);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Builder)]
pub struct RunConfig {
    #[builder(default)]
    pub streaming_mode: StreamingMode,
    /// Run-wide budget of model calls. 0 means unbounded.
    #[builder(default)]
    pub max_llm_calls: usize,
    pub model_timeout: Option<Duration>,
    pub tool_timeout: Option<Duration>,
    pub remote_timeout: Option<Duration>,
    /// Store inline blobs of the user message as artifacts and replace them
    /// with a text placeholder.
    #[builder(default)]
    pub save_input_blobs_as_artifacts: bool,
}

impl RunConfig {
    /// Whether `calls` model calls have exhausted the budget.
    pub fn llm_budget_exceeded(&self, calls: usize) -> bool {
        self.max_llm_calls > 0 && calls > self.max_llm_calls
    }
}

/// `[run]` table of a config file. Durations are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSettings {
    pub streaming_mode: Option<StreamingMode>,
    pub max_llm_calls: Option<usize>,
    pub model_timeout_ms: Option<u64>,
    pub tool_timeout_ms: Option<u64>,
    pub remote_timeout_ms: Option<u64>,
    pub save_input_blobs_as_artifacts: Option<bool>,
}

impl From<&RunSettings> for RunConfig {
    fn from(settings: &RunSettings) -> Self {
        Self {
            streaming_mode: settings.streaming_mode.unwrap_or_default(),
            max_llm_calls: settings.max_llm_calls.unwrap_or(0),
            model_timeout: settings.model_timeout_ms.map(Duration::from_millis),
            tool_timeout: settings.tool_timeout_ms.map(Duration::from_millis),
            remote_timeout: settings.remote_timeout_ms.map(Duration::from_millis),
            save_input_blobs_as_artifacts: settings
                .save_input_blobs_as_artifacts
                .unwrap_or(false),
        }
    }
}
