//! Tool system for function calling.

pub mod agent_tool;
pub mod arguments;
pub mod builtin;
pub mod context;
pub mod tool;
pub mod types;
pub mod validation;

pub use agent_tool::AgentTool;
pub use arguments::ToolArguments;
pub use context::ToolContext;
pub use tool::{FunctionTool, Tool};
pub use types::{ParameterBuilder, ToolParameters};
