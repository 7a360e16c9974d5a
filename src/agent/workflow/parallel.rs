//! Runs sub-agents concurrently on isolated branches.

use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::agent::{agent_builder_methods, Agent, AgentBase, AgentKind, InvocationContext};
use crate::error::ArborError;
use crate::event::{Event, EventStream};

type Delivery = (Result<Event, ArborError>, oneshot::Sender<()>);

/// Runs every sub-agent at the same time.
///
/// Each child gets its own branch (`<branch>.<parallel>.<child>`), so it
/// does not see its siblings' conversation, while state remains shared.
/// Events interleave in the order children produce them; a child waits for
/// each of its events to be committed before it continues.
pub struct ParallelAgent {
    base: AgentBase,
}

impl ParallelAgent {
    pub fn builder(name: impl Into<String>) -> ParallelAgentBuilder {
        ParallelAgentBuilder {
            base: AgentBase::new(name),
        }
    }
}

fn child_branch(ctx: &InvocationContext, parallel: &str, child: &str) -> String {
    match ctx.branch() {
        Some(branch) => format!("{branch}.{parallel}.{child}"),
        None => format!("{parallel}.{child}"),
    }
}

/// Drain one child's stream into `tx`, waiting for an ack after each item.
async fn pump(mut events: EventStream, tx: mpsc::Sender<Delivery>) {
    while let Some(item) = events.next().await {
        let failed = item.is_err();
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send((item, ack_tx)).await.is_err() || ack_rx.await.is_err() {
            return;
        }
        if failed {
            return;
        }
    }
}

impl Agent for ParallelAgent {
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
        AgentKind::Parallel
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let children = self.base.sub_agents.clone();
        let name = self.base.name.clone();
        self.base.wrap(ctx, move |ctx| {
            Box::pin(async_stream::stream! {
                let (tx, mut rx) = mpsc::channel::<Delivery>(children.len().max(1));
                // Dropping the set (with the stream) aborts every child.
                let mut tasks = JoinSet::new();
                for child in &children {
                    let branch = child_branch(&ctx, &name, child.name());
                    let child_ctx = ctx.with_agent(child.clone()).with_branch(Some(branch));
                    let events = child.clone().run(child_ctx);
                    tasks.spawn(pump(events, tx.clone()));
                }
                drop(tx);
                debug!(agent = %name, children = children.len(), "parallel children started");

                while let Some((item, ack)) = rx.recv().await {
                    match item {
                        Ok(event) => {
                            yield Ok(event);
                            let _ = ack.send(());
                        }
                        Err(err) => {
                            yield Err(err);
                            return;
                        }
                    }
                }

                while let Some(joined) = tasks.join_next().await {
                    if let Err(err) = joined {
                        warn!(agent = %name, error = %err, "parallel child task ended abnormally");
                    }
                }
            })
        })
    }
}

pub struct ParallelAgentBuilder {
    base: AgentBase,
}

impl ParallelAgentBuilder {
    agent_builder_methods!();

    pub fn build(self) -> ParallelAgent {
        ParallelAgent { base: self.base }
    }
}
