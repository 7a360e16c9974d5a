//! Agents: polymorphic units of work composed into trees.
//!
//! Every variant exposes a single capability, [`Agent::run`], producing a
//! lazy [`EventStream`]. Composites hold ordered children of the same
//! abstraction.

pub mod callbacks;
pub mod context;
pub mod custom;
pub mod llm;
#[cfg(feature = "remote")]
pub mod remote;
pub mod workflow;

pub use callbacks::{
    AfterAgent, AfterModel, AfterTool, BeforeAgent, BeforeModel, BeforeTool, HookPoint, Pipeline,
    ToolInvocation, ToolOutcome,
};
pub use context::{CallbackContext, InvocationContext, StateView};
pub use custom::CustomAgent;
pub use llm::{InstructionProvider, LlmAgent, LlmAgentBuilder};
#[cfg(feature = "remote")]
pub use remote::{AgentCard, RemoteAgent};
pub use workflow::{LoopAgent, ParallelAgent, SequentialAgent};

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::debug;

use crate::error::ArborError;
use crate::event::{Event, EventStream, USER_AUTHOR};
use crate::types::Content;

/// Which variant an agent is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentKind {
    Llm,
    Sequential,
    Parallel,
    Loop,
    Custom,
    Remote,
}

/// Transfer permissions of an LLM agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferOptions {
    pub disallow_transfer_to_parent: bool,
    pub disallow_transfer_to_peers: bool,
}

/// A named node of the agent tree.
pub trait Agent: Send + Sync {
    /// Unique within the tree.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Ordered children.
    fn sub_agents(&self) -> &[Arc<dyn Agent>];

    fn kind(&self) -> AgentKind;

    /// Start a run. The returned stream is lazy: nothing happens until it is
    /// polled, and it cannot be restarted.
    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream;

    /// Transfer permissions; `None` for agents that cannot take part in
    /// LLM-driven transfer.
    fn transfer_options(&self) -> Option<TransferOptions> {
        None
    }
}

impl std::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Depth-first search for an agent by name, `root` included.
pub fn find_agent(root: &Arc<dyn Agent>, name: &str) -> Option<Arc<dyn Agent>> {
    if root.name() == name {
        return Some(root.clone());
    }
    root.sub_agents()
        .iter()
        .find_map(|child| find_agent(child, name))
}

/// Path from `root` down to the agent called `name`, both ends included.
pub fn agent_path(root: &Arc<dyn Agent>, name: &str) -> Option<Vec<Arc<dyn Agent>>> {
    if root.name() == name {
        return Some(vec![root.clone()]);
    }
    for child in root.sub_agents() {
        if let Some(mut path) = agent_path(child, name) {
            path.insert(0, root.clone());
            return Some(path);
        }
    }
    None
}

/// Parent of the agent called `name`, if it is below `root`.
pub fn find_parent(root: &Arc<dyn Agent>, name: &str) -> Option<Arc<dyn Agent>> {
    let path = agent_path(root, name)?;
    (path.len() >= 2).then(|| path[path.len() - 2].clone())
}

/// Whether an escalation raised by `author` stops at a [`LoopAgent`] strictly
/// between `children` (the caller's sub-agents) and `author`.
pub(crate) fn escalation_absorbed(children: &[Arc<dyn Agent>], author: &str) -> bool {
    children
        .iter()
        .find_map(|child| agent_path(child, author))
        .is_some_and(|path| {
            path.iter()
                .take(path.len().saturating_sub(1))
                .any(|agent| agent.kind() == AgentKind::Loop)
        })
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Check tree wiring: identifier names, unique across the tree, not `"user"`,
/// and no agent attached under two parents.
pub fn validate_tree(root: &Arc<dyn Agent>) -> Result<(), ArborError> {
    let mut seen = HashSet::new();
    let mut pointers: HashSet<*const ()> = HashSet::new();
    let mut pending = vec![root.clone()];
    while let Some(agent) = pending.pop() {
        let name = agent.name();
        if !is_identifier(name) {
            return Err(ArborError::Configuration(format!(
                "agent name '{name}' must be an identifier"
            )));
        }
        if name == USER_AUTHOR {
            return Err(ArborError::Configuration(
                "agent name 'user' is reserved for client input".into(),
            ));
        }
        if !seen.insert(name.to_string()) {
            return Err(ArborError::Configuration(format!(
                "agent name '{name}' appears more than once in the tree"
            )));
        }
        if !pointers.insert(Arc::as_ptr(&agent) as *const ()) {
            return Err(ArborError::Configuration(format!(
                "agent '{name}' is attached to more than one parent"
            )));
        }
        pending.extend(agent.sub_agents().iter().cloned());
    }
    Ok(())
}

/// Terminal items of a failed agent: an error event, then the error itself.
pub(crate) fn failure(ctx: &InvocationContext, err: ArborError) -> [Result<Event, ArborError>; 2] {
    [Ok(ctx.new_event().with_error(&err)), Err(err)]
}

/// Result of an agent-level interceptor. Content returned before the agent
/// skips it; content returned after it is emitted as an extra output.
pub type AgentCallbackResult<'a> = BoxFuture<'a, Result<Option<Content>, ArborError>>;

/// Fields and agent-level callbacks shared by every variant.
#[derive(Default)]
pub struct AgentBase {
    pub name: String,
    pub description: String,
    pub sub_agents: Vec<Arc<dyn Agent>>,
    pub before_agent: Pipeline<BeforeAgent>,
    pub after_agent: Pipeline<AfterAgent>,
}

impl AgentBase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Run `body` between the agent's before/after callbacks.
    ///
    /// A before-agent replacement becomes the agent's only output. Any state
    /// the callbacks write is emitted as an event of its own.
    pub(crate) fn wrap<F>(&self, ctx: InvocationContext, body: F) -> EventStream
    where
        F: FnOnce(InvocationContext) -> EventStream + Send + 'static,
    {
        let before = self.before_agent.clone();
        let after = self.after_agent.clone();
        let name = self.name.clone();

        Box::pin(async_stream::stream! {
            debug!(invocation_id = %ctx.invocation_id(), agent = %name, "agent start");

            if !before.is_empty() {
                let cb_ctx = CallbackContext::new(ctx.clone());
                match before.run(&cb_ctx, &mut ()).await {
                    Ok(Some(content)) => {
                        debug!(agent = %name, "agent skipped by before-agent callback");
                        yield Ok(ctx
                            .new_event()
                            .with_content(content)
                            .with_actions(cb_ctx.take_actions()));
                        return;
                    }
                    Ok(None) => {
                        let actions = cb_ctx.take_actions();
                        if !actions.is_empty() {
                            yield Ok(ctx.new_event().with_actions(actions));
                        }
                    }
                    Err(err) => {
                        for item in failure(&ctx, err) {
                            yield item;
                        }
                        return;
                    }
                }
            }

            let mut inner = body(ctx.clone());
            while let Some(item) = inner.next().await {
                let failed = item.is_err();
                yield item;
                if failed {
                    return;
                }
            }

            if !after.is_empty() {
                let cb_ctx = CallbackContext::new(ctx.clone());
                match after.run(&cb_ctx, &mut ()).await {
                    Ok(replacement) => {
                        let actions = cb_ctx.take_actions();
                        if replacement.is_some() || !actions.is_empty() {
                            let mut event = ctx.new_event().with_actions(actions);
                            event.content = replacement;
                            yield Ok(event);
                        }
                    }
                    Err(err) => {
                        for item in failure(&ctx, err) {
                            yield item;
                        }
                        return;
                    }
                }
            }
            debug!(invocation_id = %ctx.invocation_id(), agent = %name, "agent finished");
        })
    }
}

/// Builder methods shared by every agent builder.
macro_rules! agent_builder_methods {
    () => {
        pub fn description(mut self, description: impl Into<String>) -> Self {
            self.base.description = description.into();
            self
        }

        pub fn sub_agent(mut self, agent: std::sync::Arc<dyn $crate::agent::Agent>) -> Self {
            self.base.sub_agents.push(agent);
            self
        }

        pub fn sub_agents(
            mut self,
            agents: impl IntoIterator<Item = std::sync::Arc<dyn $crate::agent::Agent>>,
        ) -> Self {
            self.base.sub_agents.extend(agents);
            self
        }

        /// Register a before-agent interceptor. Returning content skips the agent.
        pub fn before_agent<F>(mut self, f: F) -> Self
        where
            F: for<'a> Fn(
                    &'a $crate::agent::CallbackContext,
                    &'a mut (),
                ) -> $crate::agent::AgentCallbackResult<'a>
                + Send
                + Sync
                + 'static,
        {
            self.base.before_agent.push(f);
            self
        }

        /// Register an after-agent interceptor. Returned content is emitted
        /// as an extra final output.
        pub fn after_agent<F>(mut self, f: F) -> Self
        where
            F: for<'a> Fn(
                    &'a $crate::agent::CallbackContext,
                    &'a mut (),
                ) -> $crate::agent::AgentCallbackResult<'a>
                + Send
                + Sync
                + 'static,
        {
            self.base.after_agent.push(f);
            self
        }
    };
}
pub(crate) use agent_builder_methods;
