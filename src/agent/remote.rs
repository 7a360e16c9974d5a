//! Proxy for an agent hosted behind an HTTP endpoint.
//!
//! Discovery reads the agent card at `/.well-known/agent.json`; invocation
//! is JSON-RPC 2.0, either `message/send` (all events in one response) or
//! `message/stream` (one event per SSE `data:` line).

use std::sync::Arc;
use std::time::Duration;

use futures::stream::BoxStream;
use futures::{Future, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use super::llm::contents::{as_context, branch_visible};
use crate::agent::{agent_builder_methods, failure, Agent, AgentBase, AgentKind, InvocationContext};
use crate::config::ArborConfig;
use crate::error::ArborError;
use crate::event::{Event, EventStream, USER_AUTHOR};
use crate::model::http::{shared_client, SseLineBuffer};
use crate::types::Content;

/// Config key under which a default remote base URL is registered.
pub const REMOTE_PROVIDER: &str = "remote";

const CARD_PATH: &str = "/.well-known/agent.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentCapabilities {
    #[serde(default)]
    pub streaming: bool,
}

/// Descriptor a remote agent publishes about itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentCard {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON-RPC endpoint. Empty means the base URL itself.
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub capabilities: AgentCapabilities,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct SendResult {
    #[serde(default)]
    events: Vec<Event>,
}

type RemoteEvents = BoxStream<'static, Result<Event, ArborError>>;

/// Local stand-in for a remotely hosted agent.
///
/// Events returned by the remote side are re-authored as this agent and
/// stamped with the local invocation and branch. Remote transfers are not
/// honored locally.
pub struct RemoteAgent {
    base: AgentBase,
    base_url: String,
    card: OnceCell<AgentCard>,
}

impl std::fmt::Debug for RemoteAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAgent")
            .field("name", &self.base.name)
            .field("base_url", &self.base_url)
            .finish()
    }
}

async fn within<T>(
    deadline: Option<(Instant, Duration)>,
    future: impl Future<Output = Result<T, ArborError>>,
) -> Result<T, ArborError> {
    match deadline {
        Some((at, budget)) => tokio::time::timeout_at(at, future)
            .await
            .unwrap_or(Err(ArborError::Timeout(budget.as_millis() as u64))),
        None => future.await,
    }
}

impl RemoteAgent {
    pub fn builder(name: impl Into<String>) -> RemoteAgentBuilder {
        RemoteAgentBuilder {
            base: AgentBase::new(name),
            base_url: None,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn remote_error(&self, message: impl Into<String>) -> ArborError {
        ArborError::Remote {
            agent: self.base.name.clone(),
            message: message.into(),
        }
    }

    /// Fetch (once) and return the remote agent card.
    pub async fn card(&self) -> Result<&AgentCard, ArborError> {
        self.card
            .get_or_try_init(|| async {
                let url = format!("{}{CARD_PATH}", self.base_url);
                debug!(agent = %self.base.name, %url, "fetching agent card");
                let response = shared_client()?
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| self.remote_error(format!("agent card request failed: {e}")))?;
                if !response.status().is_success() {
                    return Err(self.remote_error(format!(
                        "agent card request returned status {}",
                        response.status().as_u16()
                    )));
                }
                response
                    .json::<AgentCard>()
                    .await
                    .map_err(|e| self.remote_error(format!("invalid agent card: {e}")))
            })
            .await
    }

    fn endpoint(&self, card: &AgentCard) -> String {
        if card.url.is_empty() {
            self.base_url.clone()
        } else {
            card.url.clone()
        }
    }

    /// Contents the remote side has not seen yet: everything visible after
    /// this agent's own latest event.
    fn pending_contents(&self, ctx: &InvocationContext) -> Vec<Content> {
        ctx.with_session(|session| {
            let visible: Vec<&Event> = session
                .events
                .iter()
                .filter(|e| !e.partial && !e.is_error() && e.content.is_some())
                .filter(|e| branch_visible(ctx.branch(), e.branch.as_deref()))
                .collect();
            let start = visible
                .iter()
                .rposition(|e| e.author == self.base.name)
                .map_or(0, |i| i + 1);
            visible[start..]
                .iter()
                .filter_map(|e| {
                    if e.author == USER_AUTHOR {
                        e.content.clone()
                    } else {
                        as_context(e)
                    }
                })
                .collect()
        })
    }

    async fn open(&self, ctx: &InvocationContext) -> Result<RemoteEvents, ArborError> {
        let card = self.card().await?;
        let streaming =
            card.capabilities.streaming && ctx.run_config().streaming_mode.is_streaming();
        let method = if streaming { "message/stream" } else { "message/send" };
        let body = json!({
            "jsonrpc": "2.0",
            "id": Uuid::new_v4().to_string(),
            "method": method,
            "params": {
                "agent": card.name,
                "context_id": ctx.session_id(),
                "user_id": ctx.user_id(),
                "contents": self.pending_contents(ctx),
            },
        });
        debug!(agent = %self.base.name, method, "calling remote agent");

        let response = shared_client()?
            .post(self.endpoint(card))
            .json(&body)
            .send()
            .await
            .map_err(|e| self.remote_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.remote_error(format!("status {}: {text}", status.as_u16())));
        }

        if !streaming {
            let reply: RpcResponse<SendResult> = response
                .json()
                .await
                .map_err(|e| self.remote_error(format!("invalid response: {e}")))?;
            if let Some(err) = reply.error {
                return Err(self.remote_error(format!("{} (code {})", err.message, err.code)));
            }
            let events = reply.result.map(|r| r.events).unwrap_or_default();
            return Ok(Box::pin(futures::stream::iter(events.into_iter().map(Ok))));
        }

        let name = self.base.name.clone();
        let bytes = response.bytes_stream();
        Ok(Box::pin(async_stream::stream! {
            let mut lines = SseLineBuffer::new();
            futures::pin_mut!(bytes);
            let mut pending: Vec<String> = Vec::new();
            loop {
                let chunk = bytes.next().await;
                let done = chunk.is_none();
                match chunk {
                    Some(Ok(chunk)) => pending.extend(lines.push(&chunk)),
                    Some(Err(e)) => {
                        yield Err(ArborError::Remote { agent: name.clone(), message: e.to_string() });
                        return;
                    }
                    None => pending.extend(lines.finish()),
                }
                for data in pending.drain(..) {
                    match serde_json::from_str::<RpcResponse<Event>>(&data) {
                        Ok(RpcResponse { error: Some(err), .. }) => {
                            yield Err(ArborError::Remote {
                                agent: name.clone(),
                                message: format!("{} (code {})", err.message, err.code),
                            });
                            return;
                        }
                        Ok(RpcResponse { result: Some(event), .. }) => yield Ok(event),
                        Ok(_) => {}
                        Err(e) => {
                            yield Err(ArborError::Remote {
                                agent: name.clone(),
                                message: format!("invalid stream item: {e}"),
                            });
                            return;
                        }
                    }
                }
                if done {
                    return;
                }
            }
        }))
    }

    /// Re-home a remote event in the local run.
    fn restamp(&self, ctx: &InvocationContext, remote: Event) -> Event {
        let mut event = ctx.new_event();
        event.content = remote.content;
        event.actions = remote.actions;
        event.actions.transfer_to_agent = None;
        event.partial = remote.partial;
        event.finish_reason = remote.finish_reason;
        event.usage = remote.usage;
        event.error_code = remote.error_code;
        event.error_message = remote.error_message;
        event
    }
}

impl Agent for RemoteAgent {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn description(&self) -> &str {
        &self.base.description
    }

    fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &self.base.sub_agents
    }

    fn kind(&self) -> AgentKind {
        AgentKind::Remote
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let agent = self.clone();
        self.base.wrap(ctx, move |ctx| {
            Box::pin(async_stream::stream! {
                let deadline = ctx
                    .run_config()
                    .remote_timeout
                    .map(|budget| (Instant::now() + budget, budget));
                let mut remote = match within(deadline, agent.open(&ctx)).await {
                    Ok(remote) => remote,
                    Err(err) => {
                        warn!(agent = %agent.base.name, error = %err, "remote agent call failed");
                        for item in failure(&ctx, err) {
                            yield item;
                        }
                        return;
                    }
                };
                loop {
                    let next = match deadline {
                        Some((at, budget)) => tokio::time::timeout_at(at, remote.next())
                            .await
                            .unwrap_or_else(|_| {
                                Some(Err(ArborError::Timeout(budget.as_millis() as u64)))
                            }),
                        None => remote.next().await,
                    };
                    match next {
                        Some(Ok(event)) => yield Ok(agent.restamp(&ctx, event)),
                        Some(Err(err)) => {
                            warn!(agent = %agent.base.name, error = %err, "remote agent stream failed");
                            for item in failure(&ctx, err) {
                                yield item;
                            }
                            return;
                        }
                        None => return,
                    }
                }
            })
        })
    }
}

pub struct RemoteAgentBuilder {
    base: AgentBase,
    base_url: Option<String>,
}

impl RemoteAgentBuilder {
    agent_builder_methods!();

    /// Root URL the agent card is discovered under.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Use the `remote` base URL from `config` unless one was set explicitly.
    pub fn config(mut self, config: &ArborConfig) -> Self {
        if self.base_url.is_none() {
            self.base_url = config.get_base_url(REMOTE_PROVIDER);
        }
        self
    }

    pub fn build(self) -> Result<RemoteAgent, ArborError> {
        let base_url = self.base_url.ok_or_else(|| {
            ArborError::Configuration(format!("remote agent '{}' has no base URL", self.base.name))
        })?;
        Ok(RemoteAgent {
            base: self.base,
            base_url: base_url.trim_end_matches('/').to_string(),
            card: OnceCell::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_defaults_missing_fields() {
        let card: AgentCard = serde_json::from_value(json!({"name": "search"})).unwrap();
        assert_eq!(card.url, "");
        assert!(!card.capabilities.streaming);
    }

    #[test]
    fn builder_requires_base_url() {
        assert!(RemoteAgent::builder("search").build().is_err());
        let agent = RemoteAgent::builder("search")
            .base_url("http://localhost:9000/")
            .build()
            .unwrap();
        assert_eq!(agent.base_url(), "http://localhost:9000");
    }

    #[test]
    fn rpc_error_is_parsed() {
        let reply: RpcResponse<SendResult> = serde_json::from_value(json!({
            "jsonrpc": "2.0",
            "id": "1",
            "error": {"code": -32601, "message": "method not found"}
        }))
        .unwrap();
        assert_eq!(reply.error.unwrap().code, -32601);
        assert!(reply.result.is_none());
    }
}
