//! Callback pipeline: ordered interceptors at agent, model and tool boundaries.
//!
//! Each hook point holds a list of interceptors run in registration order.
//! An interceptor returns `Ok(None)` to let the next one (and eventually the
//! default action) run, or `Ok(Some(replacement))` to short-circuit both.
//! Errors propagate immediately and abort the enclosing operation.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;

use super::context::CallbackContext;
use crate::error::ArborError;
use crate::model::{LlmRequest, LlmResponse};
use crate::tools::ToolContext;
use crate::types::Content;

/// A boundary that interceptors can attach to.
pub trait HookPoint: Send + Sync + 'static {
    /// Short label used in logs and callback errors.
    const NAME: &'static str;
    /// Read/write context handed to interceptors.
    type Context: Send + Sync + 'static;
    /// The value being intercepted. Interceptors may mutate it in place.
    type Payload: Send + 'static;
    /// What a short-circuiting interceptor returns.
    type Replacement: Send + 'static;
}

pub struct BeforeAgent;
pub struct AfterAgent;
pub struct BeforeModel;
pub struct AfterModel;
pub struct BeforeTool;
pub struct AfterTool;

impl HookPoint for BeforeAgent {
    const NAME: &'static str = "before_agent";
    type Context = CallbackContext;
    type Payload = ();
    type Replacement = Content;
}

impl HookPoint for AfterAgent {
    const NAME: &'static str = "after_agent";
    type Context = CallbackContext;
    type Payload = ();
    type Replacement = Content;
}

impl HookPoint for BeforeModel {
    const NAME: &'static str = "before_model";
    type Context = CallbackContext;
    type Payload = LlmRequest;
    type Replacement = LlmResponse;
}

impl HookPoint for AfterModel {
    const NAME: &'static str = "after_model";
    type Context = CallbackContext;
    type Payload = LlmResponse;
    type Replacement = LlmResponse;
}

impl HookPoint for BeforeTool {
    const NAME: &'static str = "before_tool";
    type Context = ToolContext;
    type Payload = ToolInvocation;
    type Replacement = serde_json::Value;
}

impl HookPoint for AfterTool {
    const NAME: &'static str = "after_tool";
    type Context = ToolContext;
    type Payload = ToolOutcome;
    type Replacement = serde_json::Value;
}

/// Payload of before-tool interceptors. `args` may be rewritten in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub args: serde_json::Value,
}

/// Payload of after-tool interceptors.
///
/// When the tool failed, `error` holds the failure and `response` the error
/// payload the model will see. Returning `Err` from the interceptor re-raises
/// and aborts the turn instead.
#[derive(Debug)]
pub struct ToolOutcome {
    pub name: String,
    pub args: serde_json::Value,
    pub response: serde_json::Value,
    pub error: Option<ArborError>,
}

/// Boxed interceptor for hook point `H`.
pub type Interceptor<H> = Arc<
    dyn for<'a> Fn(
            &'a <H as HookPoint>::Context,
            &'a mut <H as HookPoint>::Payload,
        ) -> BoxFuture<'a, Result<Option<<H as HookPoint>::Replacement>, ArborError>>
        + Send
        + Sync,
>;

/// Ordered interceptors of one hook point.
pub struct Pipeline<H: HookPoint> {
    interceptors: Vec<Interceptor<H>>,
    _hook: PhantomData<fn() -> H>,
}

impl<H: HookPoint> Default for Pipeline<H> {
    fn default() -> Self {
        Self {
            interceptors: Vec::new(),
            _hook: PhantomData,
        }
    }
}

impl<H: HookPoint> Clone for Pipeline<H> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
            _hook: PhantomData,
        }
    }
}

impl<H: HookPoint> std::fmt::Debug for Pipeline<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("hook", &H::NAME)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

impl<H: HookPoint> Pipeline<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push<F>(&mut self, interceptor: F)
    where
        F: for<'a> Fn(
                &'a H::Context,
                &'a mut H::Payload,
            ) -> BoxFuture<'a, Result<Option<H::Replacement>, ArborError>>
            + Send
            + Sync
            + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Run interceptors in order until one returns a replacement.
    pub async fn run(
        &self,
        ctx: &H::Context,
        payload: &mut H::Payload,
    ) -> Result<Option<H::Replacement>, ArborError> {
        for (index, interceptor) in self.interceptors.iter().enumerate() {
            if let Some(replacement) = interceptor(ctx, payload).await? {
                tracing::debug!(hook = H::NAME, index, "callback short-circuited");
                return Ok(Some(replacement));
            }
        }
        Ok(None)
    }
}

/// Model and tool interceptors of an LLM agent.
#[derive(Debug, Clone, Default)]
pub struct ModelCallbacks {
    pub before_model: Pipeline<BeforeModel>,
    pub after_model: Pipeline<AfterModel>,
    pub before_tool: Pipeline<BeforeTool>,
    pub after_tool: Pipeline<AfterTool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter;

    impl HookPoint for Counter {
        const NAME: &'static str = "counter";
        type Context = ();
        type Payload = Vec<&'static str>;
        type Replacement = usize;
    }

    #[tokio::test]
    async fn first_replacement_short_circuits() {
        let mut pipeline = Pipeline::<Counter>::new();
        pipeline.push(|_, seen| {
            Box::pin(async move {
                seen.push("first");
                Ok(None)
            })
        });
        pipeline.push(|_, seen| {
            Box::pin(async move {
                seen.push("second");
                Ok(Some(seen.len()))
            })
        });
        pipeline.push(|_, seen| {
            Box::pin(async move {
                seen.push("third");
                Ok(None)
            })
        });

        let mut seen = Vec::new();
        let result = pipeline.run(&(), &mut seen).await.unwrap();
        assert_eq!(result, Some(2));
        assert_eq!(seen, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn errors_abort_remaining_interceptors() {
        let mut pipeline = Pipeline::<Counter>::new();
        pipeline.push(|_, _| {
            Box::pin(async move { Err(ArborError::callback("counter", "nope")) })
        });
        pipeline.push(|_, seen| {
            Box::pin(async move {
                seen.push("unreachable");
                Ok(None)
            })
        });

        let mut seen = Vec::new();
        let result = pipeline.run(&(), &mut seen).await;
        assert!(matches!(result, Err(ArborError::Callback { .. })));
        assert!(seen.is_empty());
    }

    #[tokio::test]
    async fn empty_pipeline_proceeds() {
        let pipeline = Pipeline::<Counter>::default();
        assert!(pipeline.is_empty());
        assert_eq!(pipeline.run(&(), &mut Vec::new()).await.unwrap(), None);
    }
}
