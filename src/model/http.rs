//! Shared HTTP client and SSE parsing.

use std::sync::OnceLock;

use crate::error::ArborError;

static SHARED_CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

/// Get (or create) the shared reqwest client.
///
/// Per-call deadlines come from [`RunConfig`](crate::config::RunConfig), so
/// the client itself carries only a generous connect timeout.
pub fn shared_client() -> Result<reqwest::Client, ArborError> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client.clone());
    }
    let client = reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(30))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| ArborError::Configuration(format!("failed to build HTTP client: {e}")))?;
    Ok(SHARED_CLIENT.get_or_init(|| client).clone())
}

/// Parse an SSE `data:` line, returning `None` for other lines and `[DONE]`.
pub fn parse_sse_data(line: &str) -> Option<&str> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    Some(data)
}

/// Map a non-success HTTP status to an error.
pub fn status_to_error(status: u16, body: &str) -> ArborError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());
    ArborError::api(status, message)
}

/// Incremental line splitter for SSE byte streams.
///
/// Bytes are held until a full line arrives, so multi-byte characters split
/// across network chunks decode intact.
#[derive(Debug, Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes, returning the `data:` payloads of every completed line.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut payloads = Vec::new();
        while let Some(line_end) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line[..line_end]);
            if let Some(data) = parse_sse_data(line.trim()) {
                payloads.push(data.to_string());
            }
        }
        payloads
    }

    /// Flush a trailing line without a newline terminator.
    pub fn finish(&mut self) -> Option<String> {
        let line = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&line);
        parse_sse_data(line.trim()).map(str::to_string)
    }
}
