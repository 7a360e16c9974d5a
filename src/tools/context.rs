//! Context handed to tools and tool callbacks.

use std::ops::Deref;

use crate::agent::{CallbackContext, InvocationContext};
use crate::error::ArborError;
use crate::memory::SearchMemoryResponse;

/// A [`CallbackContext`] bound to one function call.
///
/// Actions recorded here (state writes, escalation, transfer) are attached
/// to the function-response event of the call.
#[derive(Clone, Debug)]
pub struct ToolContext {
    callback: CallbackContext,
    function_call_id: String,
}

impl ToolContext {
    pub fn new(invocation: InvocationContext, function_call_id: impl Into<String>) -> Self {
        Self {
            callback: CallbackContext::new(invocation),
            function_call_id: function_call_id.into(),
        }
    }

    pub fn function_call_id(&self) -> &str {
        &self.function_call_id
    }

    pub fn callback_context(&self) -> &CallbackContext {
        &self.callback
    }

    /// Stop the enclosing loop (and sequence) after this call.
    pub fn escalate(&self) {
        self.update_actions(|actions| actions.escalate = true);
    }

    /// Hand the rest of the run to the agent called `agent_name`.
    pub fn transfer_to_agent(&self, agent_name: impl Into<String>) {
        let agent_name = agent_name.into();
        self.update_actions(|actions| actions.transfer_to_agent = Some(agent_name));
    }

    /// Make the function response the agent's final output; the model is
    /// not called again to summarize it.
    pub fn skip_summarization(&self) {
        self.update_actions(|actions| actions.skip_summarization = true);
    }

    /// Search the user's long-term memory.
    pub async fn search_memory(&self, query: &str) -> Result<SearchMemoryResponse, ArborError> {
        let invocation = self.callback.invocation();
        let memory = invocation
            .memory_service()
            .ok_or_else(|| ArborError::Configuration("memory service is not configured".into()))?;
        memory
            .search(&invocation.app_name(), &invocation.user_id(), query)
            .await
    }
}

impl Deref for ToolContext {
    type Target = CallbackContext;

    fn deref(&self) -> &CallbackContext {
        &self.callback
    }
}
