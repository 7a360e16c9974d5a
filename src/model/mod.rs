//! Model capability: the opaque request/response boundary to a language model.

pub mod http;

#[cfg(feature = "gemini")]
pub mod gemini;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ArborError;
use crate::types::{Content, FinishReason, GenerationConfig, Part, Role, Usage};

/// Declaration of a callable tool sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A request to the model capability.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmRequest {
    pub contents: Vec<Content>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDeclaration>,
    pub generation_config: GenerationConfig,
}

impl LlmRequest {
    /// Append a paragraph to the system instruction.
    pub fn append_instruction(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match &mut self.system_instruction {
            Some(existing) if !existing.is_empty() => {
                existing.push_str("\n\n");
                existing.push_str(text);
            }
            _ => self.system_instruction = Some(text.to_string()),
        }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name == name)
    }
}

/// One chunk (streaming) or the whole (non-streaming) model response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: Option<Content>,
    /// A streaming chunk; the aggregated response follows with `partial = false`.
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<FinishReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl LlmResponse {
    pub fn new(content: Content) -> Self {
        Self {
            content: Some(content),
            ..Default::default()
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Content::model(text))
    }

    pub fn text_content(&self) -> String {
        self.content.as_ref().map(Content::text).unwrap_or_default()
    }
}

pub type LlmResponseStream = BoxStream<'static, Result<LlmResponse, ArborError>>;

/// Model capability implemented by concrete clients.
///
/// With `stream = false` the stream yields exactly one non-partial response.
/// With `stream = true` it yields zero or more partial chunks followed by one
/// aggregated non-partial response.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Model identifier (e.g. `gemini-2.0-flash`).
    fn name(&self) -> &str;

    async fn generate(
        &self,
        request: LlmRequest,
        stream: bool,
    ) -> Result<LlmResponseStream, ArborError>;
}

/// Folds streamed chunks into the final aggregated response.
#[derive(Debug, Default)]
pub struct StreamAggregator {
    text: String,
    other_parts: Vec<Part>,
    finish_reason: Option<FinishReason>,
    usage: Option<Usage>,
}

impl StreamAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &LlmResponse) {
        if let Some(content) = &chunk.content {
            for part in &content.parts {
                match part {
                    Part::Text { text } => self.text.push_str(text),
                    other => self.other_parts.push(other.clone()),
                }
            }
        }
        if chunk.finish_reason.is_some() {
            self.finish_reason = chunk.finish_reason;
        }
        if chunk.usage.is_some() {
            self.usage = chunk.usage.clone();
        }
    }

    /// The aggregated response, or `None` when nothing was streamed.
    pub fn finish(self) -> Option<LlmResponse> {
        if self.text.is_empty() && self.other_parts.is_empty() {
            return None;
        }
        let mut parts = Vec::with_capacity(self.other_parts.len() + 1);
        if !self.text.is_empty() {
            parts.push(Part::text(self.text));
        }
        parts.extend(self.other_parts);
        Some(LlmResponse {
            content: Some(Content::new(Role::Model, parts)),
            partial: false,
            finish_reason: self.finish_reason,
            usage: self.usage,
            error_code: None,
            error_message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionCall;

    #[test]
    fn aggregator_joins_text_and_keeps_calls() {
        let mut agg = StreamAggregator::new();
        agg.push(&LlmResponse {
            partial: true,
            ..LlmResponse::text("Hel")
        });
        agg.push(&LlmResponse {
            partial: true,
            ..LlmResponse::new(Content::new(
                Role::Model,
                vec![
                    Part::text("lo"),
                    Part::FunctionCall(FunctionCall {
                        id: "c1".into(),
                        name: "lookup".into(),
                        args: serde_json::json!({}),
                    }),
                ],
            ))
        });
        let done = agg.finish().unwrap();
        assert!(!done.partial);
        assert_eq!(done.text_content(), "Hello");
        assert_eq!(done.content.unwrap().function_calls().len(), 1);
    }

    #[test]
    fn instruction_paragraphs_are_appended() {
        let mut request = LlmRequest::default();
        request.append_instruction("You are helpful.");
        request.append_instruction("");
        request.append_instruction("Be brief.");
        assert_eq!(
            request.system_instruction.as_deref(),
            Some("You are helpful.\n\nBe brief.")
        );
    }
}
