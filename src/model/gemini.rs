//! Google Gemini client.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use super::http::{shared_client, status_to_error, SseLineBuffer};
use super::{Llm, LlmRequest, LlmResponse, LlmResponseStream, StreamAggregator};
use crate::config::ArborConfig;
use crate::error::ArborError;
use crate::types::{Blob, Content, FinishReason, FunctionCall, Part, Role, Usage};

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// [`Llm`] backed by the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiModel {
    model: String,
    api_key: String,
    base_url: String,
}

impl std::fmt::Debug for GeminiModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiModel")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GeminiModel {
    pub fn new(model: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Build from the `google` entries of a config.
    pub fn from_config(model: impl Into<String>, config: &ArborConfig) -> Result<Self, ArborError> {
        let api_key = config.get_api_key("google").ok_or_else(|| {
            ArborError::Configuration("Missing GOOGLE_API_KEY or GEMINI_API_KEY".into())
        })?;
        let mut gemini = Self::new(model, api_key);
        if let Some(url) = config.get_base_url("google") {
            gemini = gemini.with_base_url(url);
        }
        Ok(gemini)
    }

    fn build_request_body(&self, request: &LlmRequest) -> Value {
        let contents: Vec<Value> = request
            .contents
            .iter()
            .filter(|content| !content.is_empty())
            .map(|content| {
                json!({
                    "role": match content.role {
                        Role::User => "user",
                        Role::Model => "model",
                    },
                    "parts": content.parts.iter().map(to_gemini_part).collect::<Vec<_>>(),
                })
            })
            .collect();

        let mut body = Map::new();
        body.insert("contents".into(), Value::Array(contents));

        if let Some(system) = request.system_instruction.as_deref() {
            if !system.is_empty() {
                body.insert(
                    "systemInstruction".into(),
                    json!({ "parts": [{ "text": system }] }),
                );
            }
        }

        let config = &request.generation_config;
        let mut gen_config = Map::new();
        if let Some(max) = config.max_output_tokens {
            gen_config.insert("maxOutputTokens".into(), max.into());
        }
        if let Some(temp) = config.temperature {
            gen_config.insert("temperature".into(), temp.into());
        }
        if let Some(top_p) = config.top_p {
            gen_config.insert("topP".into(), top_p.into());
        }
        if let Some(top_k) = config.top_k {
            gen_config.insert("topK".into(), top_k.into());
        }
        if let Some(seed) = config.seed {
            gen_config.insert("seed".into(), seed.into());
        }
        if let Some(ref stops) = config.stop_sequences {
            gen_config.insert("stopSequences".into(), json!(stops));
        }
        if let Some(ref schema) = config.response_schema {
            gen_config.insert("responseSchema".into(), schema.clone());
            gen_config.insert(
                "responseMimeType".into(),
                json!(config
                    .response_mime_type
                    .as_deref()
                    .unwrap_or("application/json")),
            );
        } else if let Some(ref mime) = config.response_mime_type {
            gen_config.insert("responseMimeType".into(), json!(mime));
        }
        if !gen_config.is_empty() {
            body.insert("generationConfig".into(), Value::Object(gen_config));
        }

        if !request.tools.is_empty() {
            let declarations: Vec<Value> = request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body.insert(
                "tools".into(),
                json!([{ "functionDeclarations": declarations }]),
            );
        }

        Value::Object(body)
    }

    fn url(&self, method: &str) -> String {
        let query = if method == "streamGenerateContent" {
            format!("alt=sse&key={}", self.api_key)
        } else {
            format!("key={}", self.api_key)
        };
        format!("{}/models/{}:{}?{}", self.base_url, self.model, method, query)
    }
}

#[async_trait]
impl Llm for GeminiModel {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        request: LlmRequest,
        stream: bool,
    ) -> Result<LlmResponseStream, ArborError> {
        let body = self.build_request_body(&request);
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        debug!(model = %self.model, stream, contents = request.contents.len(), "Gemini generate");

        let resp = shared_client()?
            .post(self.url(method))
            .json(&body)
            .send()
            .await?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(status_to_error(status, &body_text));
        }

        if !stream {
            let data: GeminiResponse = resp.json().await?;
            let response = data.into_llm_response(false)?;
            return Ok(Box::pin(futures::stream::once(async move { Ok(response) })));
        }

        let byte_stream = resp.bytes_stream();
        let stream = async_stream::stream! {
            let mut lines = SseLineBuffer::new();
            let mut aggregator = StreamAggregator::new();
            futures::pin_mut!(byte_stream);

            while let Some(chunk_result) = byte_stream.next().await {
                let chunk = match chunk_result {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(ArborError::Network(e));
                        return;
                    }
                };
                for data in lines.push(&chunk) {
                    match serde_json::from_str::<GeminiResponse>(&data) {
                        Ok(resp) => match resp.into_llm_response(true) {
                            Ok(partial) => {
                                aggregator.push(&partial);
                                yield Ok(partial);
                            }
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        },
                        Err(e) => debug!(error = %e, "skipping unparseable Gemini chunk"),
                    }
                }
            }
            if let Some(final_response) = aggregator.finish() {
                yield Ok(final_response);
            }
        };
        Ok(Box::pin(stream))
    }
}

fn to_gemini_part(part: &Part) -> Value {
    match part {
        Part::Text { text } => json!({ "text": text }),
        Part::FunctionCall(call) => json!({
            "functionCall": { "id": call.id, "name": call.name, "args": call.args }
        }),
        Part::FunctionResponse(response) => {
            let payload = match &response.response {
                Value::Object(_) => response.response.clone(),
                other => json!({ "result": other }),
            };
            json!({
                "functionResponse": { "id": response.id, "name": response.name, "response": payload }
            })
        }
        Part::InlineData(blob) => json!({
            "inlineData": { "mimeType": blob.mime_type, "data": STANDARD.encode(&blob.data) }
        }),
    }
}

// Internal Gemini response types

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    text: Option<String>,
    function_call: Option<GeminiFunctionCall>,
    inline_data: Option<GeminiInlineData>,
}

#[derive(Deserialize)]
struct GeminiFunctionCall {
    id: Option<String>,
    name: String,
    args: Option<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

impl GeminiResponse {
    fn into_llm_response(self, partial: bool) -> Result<LlmResponse, ArborError> {
        let usage = self.usage_metadata.map(|u| Usage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        let Some(candidate) = self.candidates.into_iter().next() else {
            if let Some(reason) = self.prompt_feedback.and_then(|f| f.block_reason) {
                return Ok(LlmResponse {
                    partial,
                    finish_reason: Some(FinishReason::ContentFilter),
                    usage,
                    error_code: Some(reason.clone()),
                    error_message: Some(format!("prompt blocked: {reason}")),
                    ..Default::default()
                });
            }
            if partial {
                return Ok(LlmResponse {
                    partial,
                    usage,
                    ..Default::default()
                });
            }
            return Err(ArborError::Model("No candidates in Gemini response".into()));
        };

        let mut parts = Vec::new();
        for part in candidate.content.map(|c| c.parts).unwrap_or_default() {
            if let Some(text) = part.text {
                parts.push(Part::text(text));
            }
            if let Some(fc) = part.function_call {
                parts.push(Part::FunctionCall(FunctionCall {
                    id: fc.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
                    name: fc.name,
                    args: fc.args.unwrap_or_else(|| Value::Object(Map::new())),
                }));
            }
            if let Some(inline) = part.inline_data {
                let data = STANDARD
                    .decode(inline.data.as_bytes())
                    .map_err(|e| ArborError::Model(format!("invalid inline data: {e}")))?;
                parts.push(Part::InlineData(Blob {
                    mime_type: inline.mime_type,
                    data,
                }));
            }
        }

        let has_calls = parts.iter().any(|p| matches!(p, Part::FunctionCall(_)));
        let finish_reason = match candidate.finish_reason.as_deref() {
            Some("STOP") if has_calls => Some(FinishReason::ToolCalls),
            Some("STOP") => Some(FinishReason::Stop),
            Some("MAX_TOKENS") => Some(FinishReason::Length),
            Some("SAFETY") | Some("RECITATION") | Some("BLOCKLIST") => {
                Some(FinishReason::ContentFilter)
            }
            Some(_) => Some(FinishReason::Error),
            None => None,
        };

        Ok(LlmResponse {
            content: (!parts.is_empty()).then(|| Content::new(Role::Model, parts)),
            partial,
            finish_reason,
            usage,
            error_code: None,
            error_message: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolDeclaration;
    use crate::types::{FunctionResponse, GenerationConfig};

    #[test]
    fn request_body_maps_roles_tools_and_schema() {
        let model = GeminiModel::new("gemini-2.0-flash", "k");
        let request = LlmRequest {
            contents: vec![
                Content::user("weather?"),
                Content::new(
                    Role::Model,
                    vec![Part::FunctionCall(FunctionCall {
                        id: "c1".into(),
                        name: "get_weather".into(),
                        args: json!({"city": "Oslo"}),
                    })],
                ),
                Content::new(
                    Role::User,
                    vec![Part::FunctionResponse(FunctionResponse::new(
                        "c1",
                        "get_weather",
                        json!("sunny"),
                    ))],
                ),
            ],
            system_instruction: Some("Be brief.".into()),
            tools: vec![ToolDeclaration {
                name: "get_weather".into(),
                description: "Weather lookup".into(),
                parameters: json!({"type": "object"}),
            }],
            generation_config: GenerationConfig::builder()
                .response_schema(json!({"type": "object"}))
                .build(),
        };
        let body = model.build_request_body(&request);
        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(
            body["contents"][1]["parts"][0]["functionCall"]["name"],
            "get_weather"
        );
        assert_eq!(
            body["contents"][2]["parts"][0]["functionResponse"]["response"]["result"],
            "sunny"
        );
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be brief.");
        assert_eq!(
            body["tools"][0]["functionDeclarations"][0]["name"],
            "get_weather"
        );
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
    }

    #[test]
    fn response_with_call_maps_to_tool_calls() {
        let raw = json!({
            "candidates": [{
                "content": {"parts": [{"functionCall": {"name": "lookup", "args": {"q": 1}}}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5}
        });
        let parsed: GeminiResponse = serde_json::from_value(raw).unwrap();
        let response = parsed.into_llm_response(false).unwrap();
        assert_eq!(response.finish_reason, Some(FinishReason::ToolCalls));
        let content = response.content.unwrap();
        let calls = content.function_calls();
        assert_eq!(calls[0].name, "lookup");
        assert!(!calls[0].id.is_empty());
        assert_eq!(response.usage.unwrap().total_tokens, 5);
    }
}
