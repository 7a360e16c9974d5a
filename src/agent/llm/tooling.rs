//! Function-call execution for one model turn.

use std::sync::Arc;

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::LlmAgent;
use crate::agent::{InvocationContext, ToolInvocation, ToolOutcome};
use crate::error::ArborError;
use crate::event::{Event, EventActions};
use crate::tools::{validation, Tool, ToolArguments, ToolContext};
use crate::types::{Content, FunctionCall, FunctionResponse, Part, Role};
use crate::util::with_deadline;

fn find_tool<'a>(tools: &'a [Arc<dyn Tool>], name: &str) -> Option<&'a Arc<dyn Tool>> {
    tools.iter().find(|tool| tool.name() == name)
}

/// Models expect an object as a function response.
fn as_response_object(value: Value) -> Value {
    if value.is_object() {
        value
    } else {
        json!({ "result": value })
    }
}

async fn invoke(
    tools: &[Arc<dyn Tool>],
    invocation: &ToolInvocation,
    ctx: &ToolContext,
) -> Result<Value, ArborError> {
    let tool = find_tool(tools, &invocation.name).ok_or_else(|| {
        ArborError::tool(&invocation.name, "tool is not available to this agent")
    })?;
    validation::validate_arguments(&invocation.args, &tool.parameters().schema)
        .map_err(|message| ArborError::InvalidArgument(format!("{}: {message}", invocation.name)))?;
    let args = ToolArguments::new(invocation.args.clone());
    let timeout = ctx.invocation().run_config().tool_timeout;
    with_deadline(timeout, tool.execute(&args, ctx)).await
}

/// Run one call through the before/after tool interceptors.
///
/// Tool failures are reported to the model as `{"error": ...}`; interceptor
/// failures abort the turn.
async fn execute_one(
    agent: &LlmAgent,
    ctx: &InvocationContext,
    tools: &[Arc<dyn Tool>],
    call: FunctionCall,
) -> Result<(FunctionResponse, EventActions), ArborError> {
    let tool_ctx = ToolContext::new(ctx.clone(), &call.id);
    let mut invocation = ToolInvocation {
        name: call.name.clone(),
        args: call.args,
    };

    let callbacks = &agent.callbacks;
    let (response, error) = match callbacks.before_tool.run(&tool_ctx, &mut invocation).await? {
        Some(value) => (value, None),
        None => match invoke(tools, &invocation, &tool_ctx).await {
            Ok(value) => (value, None),
            Err(err) => {
                warn!(tool = %invocation.name, error = %err, "tool failed");
                (json!({ "error": err.to_string() }), Some(err))
            }
        },
    };
    // After-tool interceptors see overridden results as well as real ones.
    let mut outcome = ToolOutcome {
        name: invocation.name.clone(),
        args: invocation.args.clone(),
        response,
        error,
    };
    let response = match callbacks.after_tool.run(&tool_ctx, &mut outcome).await? {
        Some(replacement) => replacement,
        None => outcome.response,
    };

    debug!(tool = %invocation.name, call_id = %call.id, "tool call finished");
    Ok((
        FunctionResponse::new(call.id, invocation.name, as_response_object(response)),
        tool_ctx.take_actions(),
    ))
}

/// Execute every call of a model response concurrently and fold the results
/// into one function-response event, in call order.
pub(super) async fn execute_calls(
    agent: &LlmAgent,
    ctx: &InvocationContext,
    tools: &[Arc<dyn Tool>],
    calls: Vec<FunctionCall>,
) -> Result<Event, ArborError> {
    let results = join_all(
        calls
            .into_iter()
            .map(|call| execute_one(agent, ctx, tools, call)),
    )
    .await;

    let mut parts = Vec::with_capacity(results.len());
    let mut actions = EventActions::default();
    for result in results {
        let (response, call_actions) = result?;
        parts.push(Part::FunctionResponse(response));
        actions.merge(call_actions);
    }
    Ok(ctx
        .new_event()
        .with_content(Content::new(Role::User, parts))
        .with_actions(actions))
}
