//! Agents whose behavior is an arbitrary event-producing closure.

use std::sync::Arc;

use crate::agent::{agent_builder_methods, Agent, AgentBase, AgentKind, InvocationContext};
use crate::event::EventStream;

type Handler = dyn Fn(InvocationContext) -> EventStream + Send + Sync;

/// Agent driven by user code.
///
/// The handler receives the invocation context (with this agent as the
/// current agent) and returns the events to emit. It may run sub-agents by
/// calling [`Agent::run`] with [`InvocationContext::with_agent`].
///
/// ```
/// use arbor::agent::CustomAgent;
/// use arbor::types::Content;
///
/// let greeter = CustomAgent::builder("greeter")
///     .description("Says hello without a model")
///     .handler(|ctx| {
///         Box::pin(async_stream::stream! {
///             yield Ok(ctx.new_event().with_content(Content::model("hello")));
///         })
///     })
///     .build();
/// # let _ = greeter;
/// ```
pub struct CustomAgent {
    base: AgentBase,
    handler: Arc<Handler>,
}

impl CustomAgent {
    pub fn builder(name: impl Into<String>) -> CustomAgentBuilder {
        CustomAgentBuilder {
            base: AgentBase::new(name),
            handler: None,
        }
    }
}

impl Agent for CustomAgent {
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
        AgentKind::Custom
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let handler = self.handler.clone();
        self.base.wrap(ctx, move |ctx| handler(ctx))
    }
}

pub struct CustomAgentBuilder {
    base: AgentBase,
    handler: Option<Arc<Handler>>,
}

impl CustomAgentBuilder {
    agent_builder_methods!();

    pub fn handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(InvocationContext) -> EventStream + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Without a handler the agent emits nothing.
    pub fn build(self) -> CustomAgent {
        CustomAgent {
            base: self.base,
            handler: self.handler.unwrap_or_else(|| {
                Arc::new(|_: InvocationContext| -> EventStream {
                    Box::pin(futures::stream::empty())
                })
            }),
        }
    }
}
