//! Repeats its sub-agents until escalation or an iteration cap.

use std::sync::Arc;

use futures::StreamExt;
use tracing::debug;

use super::halts_loop;
use crate::agent::{agent_builder_methods, failure, Agent, AgentBase, AgentKind, InvocationContext};
use crate::error::ArborError;
use crate::event::EventStream;

/// Runs its sub-agents in order, again and again.
///
/// Ends the first time any descendant escalates (typically through the
/// `exit_loop` tool), even from inside a nested loop, on transfer, or after `max_iterations` full passes. Without a cap
/// it runs until one of the former happens or the run is canceled.
pub struct LoopAgent {
    base: AgentBase,
    max_iterations: Option<usize>,
}

impl LoopAgent {
    pub fn builder(name: impl Into<String>) -> LoopAgentBuilder {
        LoopAgentBuilder {
            base: AgentBase::new(name),
            max_iterations: None,
        }
    }

    pub fn max_iterations(&self) -> Option<usize> {
        self.max_iterations
    }
}

impl Agent for LoopAgent {
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
        AgentKind::Loop
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let children = self.base.sub_agents.clone();
        let max_iterations = self.max_iterations.filter(|&n| n > 0);
        let name = self.base.name.clone();
        self.base.wrap(ctx, move |ctx| {
            Box::pin(async_stream::stream! {
                if children.is_empty() {
                    return;
                }
                let mut iteration = 0usize;
                loop {
                    if max_iterations.is_some_and(|max| iteration >= max) {
                        debug!(agent = %name, iteration, "loop reached max_iterations");
                        return;
                    }
                    if ctx.is_cancelled() {
                        for item in failure(&ctx, ArborError::Canceled) {
                            yield item;
                        }
                        return;
                    }
                    iteration += 1;
                    debug!(agent = %name, iteration, "loop iteration");

                    for child in &children {
                        let mut events = child.clone().run(ctx.with_agent(child.clone()));
                        while let Some(item) = events.next().await {
                            match item {
                                Ok(event) => {
                                    let stop = halts_loop(&event);
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
                    // Give the runner's cancellation a chance when children emit nothing.
                    tokio::task::yield_now().await;
                }
            })
        })
    }
}

pub struct LoopAgentBuilder {
    base: AgentBase,
    max_iterations: Option<usize>,
}

impl LoopAgentBuilder {
    agent_builder_methods!();

    /// Cap on full passes over the sub-agents; `0` means no cap.
    pub fn max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = Some(max_iterations);
        self
    }

    pub fn build(self) -> LoopAgent {
        LoopAgent {
            base: self.base,
            max_iterations: self.max_iterations,
        }
    }
}
