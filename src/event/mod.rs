//! Execution events: the only channel from agents to the orchestrator.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ArborError;
use crate::state::StateDelta;
use crate::types::{Content, FinishReason, Usage};

/// Lazy, finite, single-pass sequence of events produced by one agent run.
pub type EventStream = BoxStream<'static, Result<Event, ArborError>>;

/// Side-effect requests attached to an event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventActions {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub state_delta: StateDelta,
    /// Artifact file name -> saved version.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub artifact_delta: HashMap<String, i64>,
    #[serde(default)]
    pub escalate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_to_agent: Option<String>,
    #[serde(default)]
    pub skip_summarization: bool,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub long_running_tool_ids: BTreeSet<String>,
}

impl EventActions {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Fold another action set into this one. Later deltas win per key.
    pub fn merge(&mut self, other: EventActions) {
        self.state_delta.extend(other.state_delta);
        self.artifact_delta.extend(other.artifact_delta);
        self.escalate |= other.escalate;
        self.skip_summarization |= other.skip_summarization;
        if other.transfer_to_agent.is_some() {
            self.transfer_to_agent = other.transfer_to_agent;
        }
        self.long_running_tool_ids
            .extend(other.long_running_tool_ids);
    }
}

/// Immutable record of one execution step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub invocation_id: String,
    /// Agent name, or `"user"` for client input.
    pub author: String,
    /// Dotted agent path isolating parallel siblings' histories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default)]
    pub actions: EventActions,
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
    pub timestamp: DateTime<Utc>,
}

pub const USER_AUTHOR: &str = "user";

impl Event {
    pub fn new(invocation_id: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            invocation_id: invocation_id.into(),
            author: author.into(),
            branch: None,
            content: None,
            actions: EventActions::default(),
            partial: false,
            finish_reason: None,
            usage: None,
            error_code: None,
            error_message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_content(mut self, content: Content) -> Self {
        self.content = Some(content);
        self
    }

    pub fn with_actions(mut self, actions: EventActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn with_state_delta(mut self, delta: StateDelta) -> Self {
        self.actions.state_delta.extend(delta);
        self
    }

    /// Attach the error fields of a terminal error event.
    pub fn with_error(mut self, error: &ArborError) -> Self {
        self.error_code = Some(error.code().to_string());
        self.error_message = Some(error.to_string());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error_code.is_some()
    }

    /// Concatenated text of the content, if any.
    pub fn text(&self) -> String {
        self.content
            .as_ref()
            .map(Content::text)
            .unwrap_or_default()
    }

    pub fn has_function_calls(&self) -> bool {
        self.content
            .as_ref()
            .is_some_and(|c| !c.function_calls().is_empty())
    }

    pub fn has_function_responses(&self) -> bool {
        self.content
            .as_ref()
            .is_some_and(|c| !c.function_responses().is_empty())
    }

    /// Whether this event is the final output of its agent's turn.
    pub fn is_final_response(&self) -> bool {
        if self.actions.skip_summarization || !self.actions.long_running_tool_ids.is_empty() {
            return true;
        }
        !self.partial && !self.has_function_calls() && !self.has_function_responses()
    }
}
