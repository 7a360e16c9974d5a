//! Workflow agents: deterministic composition of sub-agents.

mod loop_agent;
mod parallel;
mod sequential;

pub use loop_agent::{LoopAgent, LoopAgentBuilder};
pub use parallel::{ParallelAgent, ParallelAgentBuilder};
pub use sequential::{SequentialAgent, SequentialAgentBuilder};

use std::sync::Arc;

use super::{escalation_absorbed, Agent};
use crate::event::Event;

/// Whether `event` ends the sequence that owns `children`: a transfer
/// always does, an escalation only when no loop below already consumed it.
fn halts(children: &[Arc<dyn Agent>], event: &Event) -> bool {
    if event.partial {
        return false;
    }
    event.actions.transfer_to_agent.is_some()
        || (event.actions.escalate && !escalation_absorbed(children, &event.author))
}

/// Loop variant of [`halts`]: any escalation seen by a loop ends it, nested
/// loops included.
fn halts_loop(event: &Event) -> bool {
    !event.partial && (event.actions.escalate || event.actions.transfer_to_agent.is_some())
}
