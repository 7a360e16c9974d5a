//! Convenience re-exports for common use.

pub use crate::agent::{
    Agent, CallbackContext, CustomAgent, InvocationContext, LlmAgent, LoopAgent, ParallelAgent,
    SequentialAgent,
};
#[cfg(feature = "remote")]
pub use crate::agent::RemoteAgent;
pub use crate::config::{ArborConfig, RunConfig};
pub use crate::error::{ArborError, Result};
pub use crate::event::{Event, EventActions, EventStream};
pub use crate::model::{Llm, LlmRequest, LlmResponse};
pub use crate::runner::{Runner, RunnerConfig};
pub use crate::session::{
    CreateSessionRequest, GetSessionRequest, InMemorySessionService, Session, SessionService,
};
pub use crate::state::State;
pub use crate::tools::{AgentTool, FunctionTool, Tool, ToolArguments, ToolContext, ToolParameters};
pub use crate::types::{Content, GenerationConfig, Part, Role, StreamingMode};
