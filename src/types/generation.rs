//! Generation settings and run-level enums.

use bon::Builder;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Settings forwarded to the model capability.
#[derive(Debug, Clone, Builder, Serialize, Deserialize, Default, PartialEq)]
pub struct GenerationConfig {
    pub max_output_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub top_k: Option<u32>,
    pub stop_sequences: Option<Vec<String>>,
    pub seed: Option<u64>,
    /// JSON Schema for structured output.
    pub response_schema: Option<serde_json::Value>,
    pub response_mime_type: Option<String>,
}

/// How model output is delivered during a run.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StreamingMode {
    /// One complete response per model call.
    #[default]
    None,
    /// Server-push: partial chunks followed by the aggregated response.
    Sse,
    /// Bidirectional. Calls through `generate` behave like [`StreamingMode::Sse`].
    Bidi,
}

impl StreamingMode {
    pub fn is_streaming(self) -> bool {
        !matches!(self, Self::None)
    }
}

/// Which conversation history an LLM agent sends to the model.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncludeContents {
    /// Every event on the agent's branch.
    #[default]
    Default,
    /// Only the events of the current invocation.
    None,
}

/// Why generation finished.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn streaming_mode_parses_from_config_strings() {
        assert_eq!(StreamingMode::from_str("sse").unwrap(), StreamingMode::Sse);
        assert_eq!(StreamingMode::from_str("none").unwrap(), StreamingMode::None);
        assert!(StreamingMode::Bidi.is_streaming());
        assert!(!StreamingMode::None.is_streaming());
    }

    #[test]
    fn generation_config_builder() {
        let config = GenerationConfig::builder()
            .temperature(0.2)
            .max_output_tokens(128)
            .build();
        assert_eq!(config.temperature, Some(0.2));
        assert_eq!(config.max_output_tokens, Some(128));
        assert!(config.response_schema.is_none());
    }
}
