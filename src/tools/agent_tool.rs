//! Exposes an agent as a tool of another agent.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use super::{Tool, ToolArguments, ToolContext, ToolParameters};
use crate::agent::{Agent, LlmAgent};
use crate::error::ArborError;
use crate::runner::{Runner, RunnerConfig};
use crate::session::{CreateSessionRequest, InMemorySessionService, SessionService};
use crate::state::{Scope, StateDelta};
use crate::types::Content;

/// Runs a whole agent as a single function call.
///
/// Each call gets a fresh, throwaway session seeded with the caller's
/// state. The agent's last text answer becomes the tool result, and the
/// state changes it commits are replayed onto the caller's tool actions.
pub struct AgentTool {
    agent: Arc<dyn Agent>,
    parameters: ToolParameters,
    structured_output: bool,
    skip_summarization: bool,
}

impl std::fmt::Debug for AgentTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentTool")
            .field("agent", &self.agent.name())
            .field("skip_summarization", &self.skip_summarization)
            .finish()
    }
}

impl AgentTool {
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            parameters: ToolParameters::object()
                .string("request", "What to ask the agent", true)
                .build(),
            structured_output: false,
            skip_summarization: false,
        }
    }

    /// Wrap an LLM agent; with an output schema the result is its parsed JSON.
    pub fn from_llm_agent(agent: Arc<LlmAgent>) -> Self {
        let structured_output = agent.output_schema().is_some();
        Self {
            structured_output,
            ..Self::new(agent)
        }
    }

    /// Return the agent's answer to the user as-is instead of letting the
    /// calling model summarize it.
    pub fn skip_summarization(mut self, skip: bool) -> Self {
        self.skip_summarization = skip;
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> &str {
        self.agent.description()
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(&self, args: &ToolArguments, ctx: &ToolContext) -> Result<Value, ArborError> {
        let request = args.get_str("request")?;
        let invocation = ctx.invocation();
        let app_name = invocation.app_name();
        let user_id = invocation.user_id();

        let sessions = Arc::new(InMemorySessionService::new());
        let runner = Runner::new(
            RunnerConfig::builder()
                .app_name(app_name.clone())
                .agent(self.agent.clone())
                .session_service(sessions.clone())
                .maybe_artifact_service(invocation.artifact_service().cloned())
                .maybe_memory_service(invocation.memory_service().cloned())
                .build(),
        )?;

        let seed: StateDelta = ctx
            .state()
            .snapshot()
            .iter()
            .filter(|(key, _)| Scope::of(key) != Scope::Temp)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let session = sessions
            .create(CreateSessionRequest::new(&app_name, &user_id).with_state(seed))
            .await?;
        debug!(agent = %self.agent.name(), session_id = %session.id, "running agent as tool");

        let mut events = runner.run_with_cancel(
            &user_id,
            &session.id,
            Content::user(request),
            invocation.run_config().clone(),
            invocation.cancellation_token().child_token(),
        );
        let mut answer: Option<String> = None;
        while let Some(event) = events.next().await {
            let event = event?;
            if event.partial {
                continue;
            }
            if !event.actions.state_delta.is_empty() {
                let delta = event.actions.state_delta.clone();
                ctx.update_actions(|actions| actions.state_delta.extend(delta));
            }
            let text = event.text();
            if !text.is_empty() && !event.has_function_calls() {
                answer = Some(text);
            }
        }

        if self.skip_summarization {
            ctx.skip_summarization();
        }
        let answer = answer.unwrap_or_default();
        if self.structured_output {
            return serde_json::from_str(&answer).map_err(|e| {
                ArborError::OutputValidation(format!("{} returned invalid JSON: {e}", self.name()))
            });
        }
        Ok(Value::String(answer))
    }
}
