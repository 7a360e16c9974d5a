//! Runs sub-agents one after another.

use std::sync::Arc;

use futures::StreamExt;

use super::halts;
use crate::agent::{agent_builder_methods, Agent, AgentBase, AgentKind, InvocationContext};
use crate::event::EventStream;

/// Runs each sub-agent to completion, in order, on the shared session.
///
/// Stops early when a child transfers or escalates.
pub struct SequentialAgent {
    base: AgentBase,
}

impl SequentialAgent {
    pub fn builder(name: impl Into<String>) -> SequentialAgentBuilder {
        SequentialAgentBuilder {
            base: AgentBase::new(name),
        }
    }
}

impl Agent for SequentialAgent {
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
        AgentKind::Sequential
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let children = self.base.sub_agents.clone();
        self.base.wrap(ctx, move |ctx| {
            Box::pin(async_stream::stream! {
                for child in &children {
                    let mut events = child.clone().run(ctx.with_agent(child.clone()));
                    while let Some(item) = events.next().await {
                        match item {
                            Ok(event) => {
                                let stop = halts(&children, &event);
                                yield Ok(event);
                                if stop {
                                    return;
                                }
                            }
                            Err(err) => {
                                yield Err(err);
                                return;
                            }
                        }
                    }
                }
            })
        })
    }
}

pub struct SequentialAgentBuilder {
    base: AgentBase,
}

impl SequentialAgentBuilder {
    agent_builder_methods!();

    pub fn build(self) -> SequentialAgent {
        SequentialAgent { base: self.base }
    }
}
