//! Instruction templating from session state and artifacts.

use std::sync::OnceLock;

use regex::Regex;

use super::{APP_PREFIX, TEMP_PREFIX, USER_PREFIX};
use crate::agent::InvocationContext;
use crate::error::ArborError;
use crate::types::Part;

static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

fn placeholder() -> Result<&'static Regex, ArborError> {
    if let Some(re) = PLACEHOLDER.get() {
        return Ok(re);
    }
    let re = Regex::new(r"\{+[^{}]*\}+")
        .map_err(|e| ArborError::Configuration(format!("placeholder pattern: {e}")))?;
    Ok(PLACEHOLDER.get_or_init(|| re))
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A plain identifier, optionally behind one of the scope prefixes.
fn is_state_name(name: &str) -> bool {
    for prefix in [APP_PREFIX, USER_PREFIX, TEMP_PREFIX] {
        if let Some(rest) = name.strip_prefix(prefix) {
            return is_identifier(rest);
        }
    }
    is_identifier(name)
}

enum Placeholder<'a> {
    Literal(&'a str),
    State { key: &'a str, optional: bool },
    Artifact { name: &'a str, optional: bool },
    Untouched(&'a str),
}

fn classify(raw: &str) -> Placeholder<'_> {
    if raw.starts_with("{{") && raw.ends_with("}}") {
        return Placeholder::Literal(&raw[1..raw.len() - 1]);
    }
    let inner = raw.trim_matches(|c| c == '{' || c == '}').trim();
    let (key, optional) = match inner.strip_suffix('?') {
        Some(key) => (key, true),
        None => (inner, false),
    };
    if let Some(name) = key.strip_prefix("artifact.") {
        return Placeholder::Artifact { name, optional };
    }
    if is_state_name(key) {
        Placeholder::State { key, optional }
    } else {
        Placeholder::Untouched(raw)
    }
}

fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_part(part: &Part) -> String {
    match part {
        Part::Text { text } => text.clone(),
        Part::InlineData(blob) => String::from_utf8_lossy(&blob.data).into_owned(),
        _ => String::new(),
    }
}

/// Render `{key}` placeholders of `template` from the run's state.
///
/// - `{key}` inserts the value (strings verbatim, anything else as JSON);
///   a missing key is [`ArborError::StateKeyNotFound`].
/// - `{key?}` renders empty when the key is missing.
/// - `{artifact.name}` inserts the text of the latest artifact version.
/// - `{{text}}` renders as `{text}` without lookup.
/// - Placeholders that are not state names are left as written.
pub async fn inject_session_state(
    template: &str,
    ctx: &InvocationContext,
) -> Result<String, ArborError> {
    let re = placeholder()?;
    let state = ctx.state();
    let mut rendered = String::with_capacity(template.len());
    let mut last = 0;

    for found in re.find_iter(template) {
        rendered.push_str(&template[last..found.start()]);
        last = found.end();

        match classify(found.as_str()) {
            Placeholder::Literal(text) | Placeholder::Untouched(text) => rendered.push_str(text),
            Placeholder::State { key, optional } => match state.get(key) {
                Ok(value) => rendered.push_str(&render_value(value)),
                Err(_) if optional => {}
                Err(err) => return Err(err),
            },
            Placeholder::Artifact { name, optional } => {
                let service = ctx.artifact_service().ok_or_else(|| {
                    ArborError::Configuration("artifact service is not configured".into())
                })?;
                match service.load(&ctx.artifact_scope(), name, None).await {
                    Ok(part) => rendered.push_str(&render_part(&part)),
                    Err(ArborError::ArtifactNotFound(_)) if optional => {}
                    Err(err) => return Err(err),
                }
            }
        }
    }
    rendered.push_str(&template[last..]);
    Ok(rendered)
}
