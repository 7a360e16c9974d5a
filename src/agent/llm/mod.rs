//! LLM-backed agent: model calls, tool execution and LLM-driven transfer.

pub(crate) mod contents;
mod flow;
mod tooling;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;

use super::callbacks::{ModelCallbacks, ToolInvocation, ToolOutcome};
use super::{
    agent_builder_methods, find_parent, Agent, AgentBase, AgentKind, CallbackContext,
    InvocationContext, TransferOptions,
};
use crate::error::ArborError;
use crate::event::EventStream;
use crate::model::{Llm, LlmRequest, LlmResponse};
use crate::state::inject_session_state;
use crate::tools::{builtin, validation, Tool, ToolContext};
use crate::types::{GenerationConfig, IncludeContents};

/// Computes an instruction at run time. Its output is used verbatim; call
/// [`inject_session_state`] explicitly to template it.
pub type InstructionProvider = Arc<
    dyn for<'a> Fn(&'a InvocationContext) -> BoxFuture<'a, Result<String, ArborError>>
        + Send
        + Sync,
>;

#[derive(Clone)]
enum Instruction {
    Template(String),
    Provider(InstructionProvider),
}

impl Instruction {
    async fn render(&self, ctx: &InvocationContext) -> Result<String, ArborError> {
        match self {
            Self::Template(template) => inject_session_state(template, ctx).await,
            Self::Provider(provider) => provider(ctx).await,
        }
    }
}

/// Agent that delegates to a model, optionally calling tools.
///
/// ```no_run
/// use std::sync::Arc;
/// use arbor::agent::LlmAgent;
/// use arbor::model::gemini::GeminiModel;
///
/// let agent = LlmAgent::builder("greeter")
///     .model(Arc::new(GeminiModel::new("gemini-2.0-flash", "key")))
///     .instruction("Greet {user:name?} warmly.")
///     .output_key("greeting")
///     .build()?;
/// # Ok::<(), arbor::ArborError>(())
/// ```
pub struct LlmAgent {
    base: AgentBase,
    model: Arc<dyn Llm>,
    instruction: Option<Instruction>,
    tools: Vec<Arc<dyn Tool>>,
    generation_config: GenerationConfig,
    include_contents: IncludeContents,
    output_key: Option<String>,
    output_schema: Option<Value>,
    transfer: TransferOptions,
    callbacks: ModelCallbacks,
}

impl std::fmt::Debug for LlmAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmAgent")
            .field("name", &self.base.name)
            .field("model", &self.model.name())
            .field("tools", &self.tools.iter().map(|t| t.name()).collect::<Vec<_>>())
            .field("output_key", &self.output_key)
            .finish()
    }
}

impl LlmAgent {
    pub fn builder(name: impl Into<String>) -> LlmAgentBuilder {
        LlmAgentBuilder {
            base: AgentBase::new(name),
            model: None,
            instruction: None,
            tools: Vec::new(),
            generation_config: GenerationConfig::default(),
            include_contents: IncludeContents::default(),
            output_key: None,
            output_schema: None,
            transfer: TransferOptions::default(),
            callbacks: ModelCallbacks::default(),
        }
    }

    pub fn model(&self) -> &Arc<dyn Llm> {
        &self.model
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn output_key(&self) -> Option<&str> {
        self.output_key.as_deref()
    }

    pub fn output_schema(&self) -> Option<&Value> {
        self.output_schema.as_ref()
    }

    /// Agents this one may hand the run to: its children, plus its parent
    /// and peers when the parent is an LLM agent and the flags allow it.
    fn transfer_targets(&self, ctx: &InvocationContext) -> Vec<Arc<dyn Agent>> {
        let mut targets: Vec<Arc<dyn Agent>> = self.base.sub_agents.clone();
        let Some(parent) = find_parent(ctx.root_agent(), self.name()) else {
            return targets;
        };
        if parent.transfer_options().is_none() {
            return targets;
        }
        if !self.transfer.disallow_transfer_to_parent {
            targets.push(parent.clone());
        }
        if !self.transfer.disallow_transfer_to_peers {
            targets.extend(
                parent
                    .sub_agents()
                    .iter()
                    .filter(|peer| peer.name() != self.name())
                    .cloned(),
            );
        }
        targets
    }

    /// Tools offered for one model call, the transfer tool included when
    /// there is somewhere to transfer to.
    fn tools_for_turn(&self, ctx: &InvocationContext) -> (Vec<Arc<dyn Tool>>, Option<String>) {
        let mut tools = self.tools.clone();
        let targets = self.transfer_targets(ctx);
        if targets.is_empty() {
            return (tools, None);
        }
        tools.push(builtin::transfer_to_agent());
        let parent = find_parent(ctx.root_agent(), self.name())
            .filter(|_| !self.transfer.disallow_transfer_to_parent)
            .filter(|p| p.transfer_options().is_some());
        (tools, Some(transfer_instruction(&targets, parent.as_deref())))
    }

    async fn build_request(
        &self,
        ctx: &InvocationContext,
        tools: &[Arc<dyn Tool>],
        transfer_note: Option<&str>,
    ) -> Result<LlmRequest, ArborError> {
        let mut request = LlmRequest {
            generation_config: self.generation_config.clone(),
            ..Default::default()
        };
        if let Some(instruction) = &self.instruction {
            request.append_instruction(&instruction.render(ctx).await?);
        }
        if let Some(note) = transfer_note {
            request.append_instruction(note);
        }
        request.tools = tools.iter().map(|tool| tool.declaration()).collect();
        if let Some(schema) = &self.output_schema {
            request.generation_config.response_schema = Some(schema.clone());
            request
                .generation_config
                .response_mime_type
                .get_or_insert_with(|| "application/json".to_string());
        }
        request.contents = contents::build(ctx, self.name(), self.include_contents);
        Ok(request)
    }

    /// Value stored under `output_key` for a final response text. With an
    /// output schema the text must be JSON conforming to it.
    fn output_value(&self, text: &str) -> Result<Option<Value>, ArborError> {
        let value = match &self.output_schema {
            Some(schema) => {
                let json = strip_code_fence(text);
                let value: Value = serde_json::from_str(json).map_err(|e| {
                    ArborError::OutputValidation(format!("response is not valid JSON: {e}"))
                })?;
                validation::validate_value(&value, schema).map_err(ArborError::OutputValidation)?;
                value
            }
            None => Value::String(text.to_string()),
        };
        Ok(self.output_key.as_ref().map(|_| value))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed)
}

fn transfer_instruction(targets: &[Arc<dyn Agent>], parent: Option<&dyn Agent>) -> String {
    let mut text = String::from("You have a list of other agents to transfer to:\n");
    for target in targets {
        text.push_str(&format!(
            "\nAgent name: {}\nAgent description: {}\n",
            target.name(),
            target.description()
        ));
    }
    text.push_str(
        "\nIf you are the best to answer the question according to your description, you can \
         answer it.\n\nIf another agent is better for answering the question according to its \
         description, call `transfer_to_agent` function to transfer the question to that \
         agent. When transferring, do not generate any text other than the function call.",
    );
    if let Some(parent) = parent {
        text.push_str(&format!(
            "\n\nYour parent agent is {}. If neither the other agents nor you are best for \
             answering the question according to the descriptions, transfer to your parent \
             agent.",
            parent.name()
        ));
    }
    text
}

impl Agent for LlmAgent {
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
        AgentKind::Llm
    }

    fn transfer_options(&self) -> Option<TransferOptions> {
        Some(self.transfer)
    }

    fn run(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        let agent = self.clone();
        self.base.wrap(ctx, move |ctx| flow::run(agent, ctx))
    }
}

/// Builder for [`LlmAgent`].
pub struct LlmAgentBuilder {
    base: AgentBase,
    model: Option<Arc<dyn Llm>>,
    instruction: Option<Instruction>,
    tools: Vec<Arc<dyn Tool>>,
    generation_config: GenerationConfig,
    include_contents: IncludeContents,
    output_key: Option<String>,
    output_schema: Option<Value>,
    transfer: TransferOptions,
    callbacks: ModelCallbacks,
}

impl LlmAgentBuilder {
    agent_builder_methods!();

    pub fn model(mut self, model: Arc<dyn Llm>) -> Self {
        self.model = Some(model);
        self
    }

    /// Instruction template; see [`inject_session_state`] for placeholders.
    pub fn instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(Instruction::Template(instruction.into()));
        self
    }

    pub fn instruction_provider<F>(mut self, provider: F) -> Self
    where
        F: for<'a> Fn(&'a InvocationContext) -> BoxFuture<'a, Result<String, ArborError>>
            + Send
            + Sync
            + 'static,
    {
        self.instruction = Some(Instruction::Provider(Arc::new(provider)));
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn generation_config(mut self, config: GenerationConfig) -> Self {
        self.generation_config = config;
        self
    }

    pub fn include_contents(mut self, include: IncludeContents) -> Self {
        self.include_contents = include;
        self
    }

    /// Store the final response under this state key.
    pub fn output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Require the final response to be JSON matching `schema`.
    pub fn output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn disallow_transfer_to_parent(mut self, disallow: bool) -> Self {
        self.transfer.disallow_transfer_to_parent = disallow;
        self
    }

    pub fn disallow_transfer_to_peers(mut self, disallow: bool) -> Self {
        self.transfer.disallow_transfer_to_peers = disallow;
        self
    }

    /// Register a before-model interceptor. Returning a response skips the
    /// model call.
    pub fn before_model<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a CallbackContext,
                &'a mut LlmRequest,
            ) -> BoxFuture<'a, Result<Option<LlmResponse>, ArborError>>
            + Send
            + Sync
            + 'static,
    {
        self.callbacks.before_model.push(f);
        self
    }

    /// Register an after-model interceptor. Returning a response replaces
    /// the model's.
    pub fn after_model<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a CallbackContext,
                &'a mut LlmResponse,
            ) -> BoxFuture<'a, Result<Option<LlmResponse>, ArborError>>
            + Send
            + Sync
            + 'static,
    {
        self.callbacks.after_model.push(f);
        self
    }

    /// Register a before-tool interceptor. Returning a value skips the tool
    /// and becomes its result.
    pub fn before_tool<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a ToolContext,
                &'a mut ToolInvocation,
            ) -> BoxFuture<'a, Result<Option<Value>, ArborError>>
            + Send
            + Sync
            + 'static,
    {
        self.callbacks.before_tool.push(f);
        self
    }

    /// Register an after-tool interceptor. Returning a value replaces the
    /// tool's result; returning an error aborts the turn.
    pub fn after_tool<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(
                &'a ToolContext,
                &'a mut ToolOutcome,
            ) -> BoxFuture<'a, Result<Option<Value>, ArborError>>
            + Send
            + Sync
            + 'static,
    {
        self.callbacks.after_tool.push(f);
        self
    }

    pub fn build(self) -> Result<LlmAgent, ArborError> {
        let name = self.base.name.clone();
        let model = self
            .model
            .ok_or_else(|| ArborError::Configuration(format!("agent '{name}' has no model")))?;

        let mut transfer = self.transfer;
        if self.output_schema.is_some() {
            if !self.tools.is_empty() {
                return Err(ArborError::Configuration(format!(
                    "agent '{name}' cannot combine output_schema with tools"
                )));
            }
            if !self.base.sub_agents.is_empty() {
                return Err(ArborError::Configuration(format!(
                    "agent '{name}' cannot combine output_schema with sub-agents"
                )));
            }
            transfer.disallow_transfer_to_parent = true;
            transfer.disallow_transfer_to_peers = true;
        }

        let mut seen = std::collections::HashSet::new();
        for tool in &self.tools {
            if tool.name() == builtin::TRANSFER_TO_AGENT || !seen.insert(tool.name().to_string()) {
                return Err(ArborError::Configuration(format!(
                    "agent '{name}' declares tool '{}' more than once",
                    tool.name()
                )));
            }
        }

        Ok(LlmAgent {
            base: self.base,
            model,
            instruction: self.instruction,
            tools: self.tools,
            generation_config: self.generation_config,
            include_contents: self.include_contents,
            output_key: self.output_key,
            output_schema: self.output_schema,
            transfer,
            callbacks: self.callbacks,
        })
    }
}
