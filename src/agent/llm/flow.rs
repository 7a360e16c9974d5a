//! The reason-act loop of an [`LlmAgent`]: call the model, run the tools it
//! asks for, feed the results back, until it produces a final answer.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{tooling, LlmAgent};
use crate::agent::{failure, CallbackContext, InvocationContext};
use crate::error::ArborError;
use crate::event::{Event, EventStream};
use crate::model::{LlmRequest, LlmResponse, LlmResponseStream};
use crate::tools::Tool;
use crate::types::{FunctionCall, Part};
use crate::util::with_deadline;

/// The client sent only progress updates for long-running calls; there is
/// nothing for the model to react to yet.
fn awaiting_long_running(ctx: &InvocationContext) -> bool {
    ctx.user_content().is_some_and(|content| {
        let responses = content.function_responses();
        !responses.is_empty() && responses.iter().all(|r| r.is_pending())
    })
}

/// Fail the stream with a timeout once `deadline` passes.
fn bounded(mut inner: LlmResponseStream, deadline: Instant, budget: Duration) -> LlmResponseStream {
    Box::pin(async_stream::stream! {
        loop {
            match tokio::time::timeout_at(deadline, inner.next()).await {
                Ok(Some(item)) => yield item,
                Ok(None) => break,
                Err(_) => {
                    yield Err(ArborError::Timeout(budget.as_millis() as u64));
                    break;
                }
            }
        }
    })
}

/// Responses for one model step. `replaced` is set when a before-model
/// interceptor answered instead of the model.
struct ModelCall {
    responses: LlmResponseStream,
    replaced: bool,
}

async fn call_model(
    agent: &LlmAgent,
    ctx: &InvocationContext,
    cb_ctx: &CallbackContext,
    mut request: LlmRequest,
) -> Result<ModelCall, ArborError> {
    if let Some(response) = agent.callbacks.before_model.run(cb_ctx, &mut request).await? {
        debug!(agent = %agent.base.name, "model call replaced by callback");
        return Ok(ModelCall {
            responses: Box::pin(futures::stream::once(async move { Ok(response) })),
            replaced: true,
        });
    }

    let calls = ctx.increment_llm_calls()?;
    let streaming = ctx.run_config().streaming_mode.is_streaming();
    let budget = ctx.run_config().model_timeout;
    debug!(
        agent = %agent.base.name,
        model = %agent.model.name(),
        calls,
        streaming,
        contents = request.contents.len(),
        "calling model"
    );
    let started = Instant::now();
    let stream = with_deadline(budget, agent.model.generate(request, streaming)).await?;
    Ok(ModelCall {
        responses: match budget {
            Some(budget) => bounded(stream, started + budget, budget),
            None => stream,
        },
        replaced: false,
    })
}

/// Turn the model's complete response into the agent's event. A response
/// that replaced the model call skips the after-model interceptors.
async fn finalize(
    agent: &LlmAgent,
    ctx: &InvocationContext,
    cb_ctx: &CallbackContext,
    tools: &[Arc<dyn Tool>],
    mut response: LlmResponse,
    replaced: bool,
) -> Result<Event, ArborError> {
    if !replaced {
        if let Some(replacement) = agent.callbacks.after_model.run(cb_ctx, &mut response).await? {
            response = replacement;
        }
    }
    if let Some(code) = &response.error_code {
        return Err(ArborError::Model(format!(
            "{code}: {}",
            response
                .error_message
                .as_deref()
                .unwrap_or("model returned no content")
        )));
    }

    let mut event = ctx.new_event();
    event.finish_reason = response.finish_reason;
    event.usage = response.usage;
    if let Some(mut content) = response.content {
        for part in &mut content.parts {
            if let Part::FunctionCall(call) = part {
                if call.id.is_empty() {
                    call.id = format!("arbor-{}", Uuid::new_v4());
                }
            }
        }
        event.content = Some(content);
    }
    event.actions.merge(cb_ctx.take_actions());

    let long_running: BTreeSet<String> = event
        .content
        .iter()
        .flat_map(|content| content.function_calls())
        .filter(|call| {
            tools
                .iter()
                .any(|tool| tool.name() == call.name && tool.is_long_running())
        })
        .map(|call| call.id.clone())
        .collect();
    event.actions.long_running_tool_ids.extend(long_running);

    if !event.has_function_calls() {
        let text = event.text();
        if !text.is_empty() || agent.output_schema.is_some() {
            if let (Some(key), Some(value)) = (&agent.output_key, agent.output_value(&text)?) {
                event.actions.state_delta.insert(key.clone(), value);
            }
        }
    }
    Ok(event)
}

fn calls_of(event: &Event) -> Vec<FunctionCall> {
    event
        .content
        .iter()
        .flat_map(|content| content.function_calls())
        .cloned()
        .collect()
}

pub(super) fn run(agent: Arc<LlmAgent>, ctx: InvocationContext) -> EventStream {
    Box::pin(async_stream::stream! {
        if awaiting_long_running(&ctx) {
            debug!(agent = %agent.base.name, "only progress updates received; not calling model");
            return;
        }

        loop {
            if ctx.is_cancelled() {
                for item in failure(&ctx, ArborError::Canceled) {
                    yield item;
                }
                return;
            }

            let (tools, transfer_note) = agent.tools_for_turn(&ctx);
            let request = match agent.build_request(&ctx, &tools, transfer_note.as_deref()).await {
                Ok(request) => request,
                Err(err) => {
                    for item in failure(&ctx, err) {
                        yield item;
                    }
                    return;
                }
            };

            let cb_ctx = CallbackContext::new(ctx.clone());
            let ModelCall { mut responses, replaced } = match call_model(&agent, &ctx, &cb_ctx, request).await {
                Ok(call) => call,
                Err(err) => {
                    warn!(agent = %agent.base.name, error = %err, "model call failed");
                    for item in failure(&ctx, err) {
                        yield item;
                    }
                    return;
                }
            };

            let mut last = None;
            while let Some(item) = responses.next().await {
                let response = match item {
                    Ok(response) => response,
                    Err(err) => {
                        warn!(agent = %agent.base.name, error = %err, "model stream failed");
                        for item in failure(&ctx, err) {
                            yield item;
                        }
                        return;
                    }
                };
                if response.partial {
                    let mut event = ctx.new_event();
                    event.content = response.content;
                    event.partial = true;
                    yield Ok(event);
                    continue;
                }
                match finalize(&agent, &ctx, &cb_ctx, &tools, response, replaced).await {
                    Ok(event) => {
                        last = Some(event.clone());
                        yield Ok(event);
                    }
                    Err(err) => {
                        for item in failure(&ctx, err) {
                            yield item;
                        }
                        return;
                    }
                }
            }

            let Some(model_event) = last else {
                return;
            };
            let calls = calls_of(&model_event);
            if calls.is_empty() {
                return;
            }

            let response_event = match tooling::execute_calls(&agent, &ctx, &tools, calls).await {
                Ok(event) => event,
                Err(err) => {
                    for item in failure(&ctx, err) {
                        yield item;
                    }
                    return;
                }
            };
            let actions = response_event.actions.clone();
            yield Ok(response_event);

            if actions.transfer_to_agent.is_some()
                || actions.escalate
                || actions.skip_summarization
                || !model_event.actions.long_running_tool_ids.is_empty()
            {
                return;
            }
        }
    })
}
