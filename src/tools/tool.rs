//! Tool trait and closure-based tool wrapper.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use super::arguments::ToolArguments;
use super::context::ToolContext;
use super::types::ToolParameters;
use crate::error::ArborError;
use crate::model::ToolDeclaration;

/// Core tool trait; implement it for custom tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (must match what the model calls).
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameters(&self) -> &ToolParameters;

    /// A long-running tool returns a placeholder at once; its real result
    /// arrives in a later run as a function response from the client.
    fn is_long_running(&self) -> bool {
        false
    }

    /// Declaration sent to the model.
    fn declaration(&self) -> ToolDeclaration {
        let mut description = self.description().to_string();
        if self.is_long_running() {
            description.push_str(
                "\n\nNOTE: This is a long-running operation. Do not call this tool again if it \
                 has already returned some intermediate or pending status.",
            );
        }
        ToolDeclaration {
            name: self.name().to_string(),
            description,
            parameters: self.parameters().schema.clone(),
        }
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ArborError>;
}

type ToolHandler = dyn Fn(
        ToolArguments,
        ToolContext,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ArborError>> + Send>>
    + Send
    + Sync;

/// Closure-based tool.
///
/// ```
/// use arbor::tools::{FunctionTool, ToolParameters};
///
/// let tool = FunctionTool::new(
///     "get_weather",
///     "Current weather for a city",
///     ToolParameters::object().string("city", "City name", true).build(),
///     |args, _ctx| async move {
///         let city = args.get_str("city")?;
///         Ok(serde_json::json!({ "city": city, "forecast": "sunny" }))
///     },
/// );
/// # let _ = tool;
/// ```
#[derive(Clone)]
pub struct FunctionTool {
    name: String,
    description: String,
    parameters: ToolParameters,
    long_running: bool,
    handler: Arc<ToolHandler>,
}

impl FunctionTool {
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: ToolParameters,
        handler: F,
    ) -> Self
    where
        F: Fn(ToolArguments, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value, ArborError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
            long_running: false,
            handler: Arc::new(move |args, ctx| Box::pin(handler(args, ctx))),
        }
    }

    /// Mark the tool as long-running.
    pub fn long_running(mut self) -> Self {
        self.long_running = true;
        self
    }
}

#[async_trait]
impl Tool for FunctionTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    fn is_long_running(&self) -> bool {
        self.long_running
    }

    async fn execute(
        &self,
        args: &ToolArguments,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value, ArborError> {
        (self.handler)(args.clone(), ctx.clone()).await
    }
}

impl std::fmt::Debug for FunctionTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("long_running", &self.long_running)
            .finish()
    }
}
