//! Built-in tools for control flow and memory.
//!
//! - [`exit_loop`] escalates out of the enclosing [`LoopAgent`](crate::agent::LoopAgent),
//! - [`transfer_to_agent`] hands the run to another agent of the tree,
//! - [`load_memory`] searches the user's long-term memory.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use super::tool::{FunctionTool, Tool};
use super::types::ToolParameters;

pub const EXIT_LOOP: &str = "exit_loop";
pub const TRANSFER_TO_AGENT: &str = "transfer_to_agent";
pub const LOAD_MEMORY: &str = "load_memory";

/// Signals that the loop's goal is met.
pub fn exit_loop() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        EXIT_LOOP,
        "Exits the loop. Call this function only when you are instructed to do so.",
        ToolParameters::empty(),
        |_args, ctx| async move {
            debug!(agent = %ctx.agent_name(), "exit_loop called");
            ctx.escalate();
            ctx.skip_summarization();
            Ok(json!({}))
        },
    ))
}

/// Transfers the question to another agent. Added automatically to LLM
/// agents that have transfer targets.
pub fn transfer_to_agent() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        TRANSFER_TO_AGENT,
        "Transfer the question to another agent. This tool hands off control to another \
         agent when it's more suitable to answer the user's question according to the \
         agent's description.",
        ToolParameters::object()
            .string("agent_name", "the agent name to transfer to", true)
            .build(),
        |args, ctx| async move {
            let agent_name = args.get_str("agent_name")?.to_string();
            debug!(from = %ctx.agent_name(), to = %agent_name, "transfer requested");
            ctx.transfer_to_agent(agent_name);
            Ok(json!({}))
        },
    ))
}

/// Loads memories relevant to a query.
pub fn load_memory() -> Arc<dyn Tool> {
    Arc::new(FunctionTool::new(
        LOAD_MEMORY,
        "Loads the memory for the current user.",
        ToolParameters::object()
            .string("query", "The query to load the memory for.", true)
            .build(),
        |args, ctx| async move {
            let query = args.get_str("query")?;
            let found = ctx.search_memory(query).await?;
            Ok(json!({ "memories": found.memories }))
        },
    ))
}
