//! Conversation history sent to the model, rebuilt from session events.

use std::collections::{HashMap, HashSet};

use crate::agent::InvocationContext;
use crate::event::{Event, USER_AUTHOR};
use crate::types::{Content, FunctionResponse, IncludeContents, Part, Role};

/// Whether an event on `event_branch` is visible from `branch`: events on
/// the same branch or an ancestor branch are, siblings' are not.
pub(crate) fn branch_visible(branch: Option<&str>, event_branch: Option<&str>) -> bool {
    match (branch, event_branch) {
        (_, None) | (None, _) => true,
        (Some(own), Some(other)) => {
            own == other
                || own
                    .strip_prefix(other)
                    .is_some_and(|rest| rest.starts_with('.'))
        }
    }
}

fn contributes(event: &Event, branch: Option<&str>) -> bool {
    !event.partial
        && !event.is_error()
        && event.content.as_ref().is_some_and(|c| !c.is_empty())
        && branch_visible(branch, event.branch.as_deref())
}

/// The response the model should see for each call id: the latest terminal
/// one, or the latest intermediate one when nothing terminal arrived yet.
fn settled_responses(events: &[&Event]) -> HashMap<String, FunctionResponse> {
    let mut settled: HashMap<String, FunctionResponse> = HashMap::new();
    for event in events {
        let Some(content) = &event.content else {
            continue;
        };
        for response in content.function_responses() {
            let superseded = settled
                .get(&response.id)
                .is_some_and(|current| !current.is_pending() && response.is_pending());
            if !superseded {
                settled.insert(response.id.clone(), response.clone());
            }
        }
    }
    settled
}

/// Rewrite another agent's output as user-side narration.
pub(crate) fn as_context(event: &Event) -> Option<Content> {
    let content = event.content.as_ref()?;
    let author = &event.author;
    let mut parts = vec![Part::text("For context:")];
    for part in &content.parts {
        match part {
            Part::Text { text } if !text.trim().is_empty() => {
                parts.push(Part::text(format!("[{author}] said: {text}")));
            }
            Part::Text { .. } => {}
            Part::FunctionCall(call) => parts.push(Part::text(format!(
                "[{author}] called tool `{}` with parameters: {}",
                call.name, call.args
            ))),
            Part::FunctionResponse(response) => parts.push(Part::text(format!(
                "[{author}] `{}` tool returned result: {}",
                response.name, response.response
            ))),
            Part::InlineData(blob) => parts.push(Part::InlineData(blob.clone())),
        }
    }
    (parts.len() > 1).then(|| Content::new(Role::User, parts))
}

/// Index of the first event of the current turn: the latest one written by
/// the user or by another agent.
fn current_turn_start(events: &[&Event], agent_name: &str) -> usize {
    events
        .iter()
        .rposition(|event| event.author != agent_name)
        .unwrap_or(0)
}

/// Build the model-visible history for `agent_name`.
pub(super) fn build(
    ctx: &InvocationContext,
    agent_name: &str,
    include: IncludeContents,
) -> Vec<Content> {
    ctx.with_session(|session| {
        let visible: Vec<&Event> = session
            .events
            .iter()
            .filter(|event| contributes(event, ctx.branch()))
            .collect();
        let start = match include {
            IncludeContents::Default => 0,
            IncludeContents::None => current_turn_start(&visible, agent_name),
        };
        let events = &visible[start..];

        let settled = settled_responses(events);
        let mut placed: HashSet<String> = HashSet::new();
        let mut contents = Vec::with_capacity(events.len());

        for event in events {
            if event.author != USER_AUTHOR && event.author != agent_name {
                contents.extend(as_context(event));
                continue;
            }
            let Some(content) = &event.content else {
                continue;
            };
            let mut parts = Vec::with_capacity(content.parts.len());
            for part in &content.parts {
                match part {
                    Part::FunctionResponse(response) => {
                        // First slot for a call id carries its settled response.
                        if placed.insert(response.id.clone()) {
                            let latest = settled.get(&response.id).unwrap_or(response);
                            parts.push(Part::FunctionResponse(latest.clone()));
                        }
                    }
                    other => parts.push(other.clone()),
                }
            }
            if !parts.is_empty() {
                contents.push(Content::new(content.role, parts));
            }
        }
        contents
    })
}
