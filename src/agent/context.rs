//! Invocation and callback contexts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::Agent;
use crate::artifact::{ArtifactScope, ArtifactService};
use crate::config::RunConfig;
use crate::error::ArborError;
use crate::event::{Event, EventActions};
use crate::memory::MemoryService;
use crate::session::{Session, SessionService};
use crate::state::{State, StateDelta};
use crate::types::{Content, Part};

/// Everything shared by all agents of one run.
struct RunShared {
    invocation_id: String,
    root: Arc<dyn Agent>,
    session: RwLock<Session>,
    session_service: Arc<dyn SessionService>,
    artifact_service: Option<Arc<dyn ArtifactService>>,
    memory_service: Option<Arc<dyn MemoryService>>,
    user_content: Option<Content>,
    run_config: RunConfig,
    cancel: CancellationToken,
    llm_calls: AtomicUsize,
}

/// Per-agent view of a run.
///
/// Cheap to clone. The session it exposes is the run's in-flight copy: it
/// sees every committed event of the run, `temp:` keys included.
#[derive(Clone)]
pub struct InvocationContext {
    shared: Arc<RunShared>,
    agent: Arc<dyn Agent>,
    branch: Option<String>,
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.shared.invocation_id)
            .field("agent", &self.agent.name())
            .field("branch", &self.branch)
            .finish()
    }
}

/// Inputs for [`InvocationContext::new`].
pub struct InvocationParams {
    pub invocation_id: String,
    pub root: Arc<dyn Agent>,
    pub agent: Arc<dyn Agent>,
    pub session: Session,
    pub session_service: Arc<dyn SessionService>,
    pub artifact_service: Option<Arc<dyn ArtifactService>>,
    pub memory_service: Option<Arc<dyn MemoryService>>,
    pub user_content: Option<Content>,
    pub run_config: RunConfig,
    pub cancel: CancellationToken,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

impl InvocationContext {
    pub fn new(params: InvocationParams) -> Self {
        Self {
            shared: Arc::new(RunShared {
                invocation_id: params.invocation_id,
                root: params.root,
                session: RwLock::new(params.session),
                session_service: params.session_service,
                artifact_service: params.artifact_service,
                memory_service: params.memory_service,
                user_content: params.user_content,
                run_config: params.run_config,
                cancel: params.cancel,
                llm_calls: AtomicUsize::new(0),
            }),
            agent: params.agent,
            branch: None,
        }
    }

    /// Same run, different current agent. The branch is kept.
    pub fn with_agent(&self, agent: Arc<dyn Agent>) -> Self {
        Self {
            shared: self.shared.clone(),
            agent,
            branch: self.branch.clone(),
        }
    }

    pub fn with_branch(mut self, branch: Option<String>) -> Self {
        self.branch = branch;
        self
    }

    pub fn invocation_id(&self) -> &str {
        &self.shared.invocation_id
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn agent_name(&self) -> &str {
        self.agent.name()
    }

    pub fn root_agent(&self) -> &Arc<dyn Agent> {
        &self.shared.root
    }

    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref()
    }

    pub fn user_content(&self) -> Option<&Content> {
        self.shared.user_content.as_ref()
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.shared.run_config
    }

    pub fn session_service(&self) -> &Arc<dyn SessionService> {
        &self.shared.session_service
    }

    pub fn artifact_service(&self) -> Option<&Arc<dyn ArtifactService>> {
        self.shared.artifact_service.as_ref()
    }

    pub fn memory_service(&self) -> Option<&Arc<dyn MemoryService>> {
        self.shared.memory_service.as_ref()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn app_name(&self) -> String {
        read(&self.shared.session).app_name.clone()
    }

    pub fn user_id(&self) -> String {
        read(&self.shared.session).user_id.clone()
    }

    pub fn session_id(&self) -> String {
        read(&self.shared.session).id.clone()
    }

    /// Copy of the in-flight session.
    pub fn session(&self) -> Session {
        read(&self.shared.session).clone()
    }

    /// Copy of the in-flight session state.
    pub fn state(&self) -> State {
        read(&self.shared.session).state.clone()
    }

    pub(crate) fn with_session<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&read(&self.shared.session))
    }

    /// Mirror a committed event into the in-flight session.
    pub(crate) fn absorb(&self, applied: &StateDelta, persisted: Event) {
        self.shared
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .absorb(applied, persisted);
    }

    /// Count a model call against the run budget.
    pub fn increment_llm_calls(&self) -> Result<usize, ArborError> {
        let calls = self.shared.llm_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.shared.run_config.llm_budget_exceeded(calls) {
            return Err(ArborError::LlmCallLimit(self.shared.run_config.max_llm_calls));
        }
        Ok(calls)
    }

    pub fn llm_calls(&self) -> usize {
        self.shared.llm_calls.load(Ordering::SeqCst)
    }

    /// A blank event authored by the current agent on the current branch.
    pub fn new_event(&self) -> Event {
        Event::new(self.invocation_id(), self.agent_name()).with_branch(self.branch.clone())
    }

    pub(crate) fn artifact_scope(&self) -> ArtifactScope {
        self.with_session(|s| ArtifactScope::new(&s.app_name, &s.user_id, &s.id))
    }
}

/// Context handed to agent and model callbacks, and the base of
/// [`ToolContext`](crate::tools::ToolContext).
///
/// Writes are recorded on an [`EventActions`] that is attached to the next
/// event the agent emits; reads see those pending writes over the session.
#[derive(Clone, Debug)]
pub struct CallbackContext {
    invocation: InvocationContext,
    actions: Arc<Mutex<EventActions>>,
}

impl CallbackContext {
    pub fn new(invocation: InvocationContext) -> Self {
        Self {
            invocation,
            actions: Arc::new(Mutex::new(EventActions::default())),
        }
    }

    pub fn invocation(&self) -> &InvocationContext {
        &self.invocation
    }

    pub fn invocation_id(&self) -> &str {
        self.invocation.invocation_id()
    }

    pub fn agent_name(&self) -> &str {
        self.invocation.agent_name()
    }

    pub fn user_id(&self) -> String {
        self.invocation.user_id()
    }

    pub fn session_id(&self) -> String {
        self.invocation.session_id()
    }

    pub fn user_content(&self) -> Option<&Content> {
        self.invocation.user_content()
    }

    /// Read/write view of session state.
    pub fn state(&self) -> StateView<'_> {
        StateView { ctx: self }
    }

    fn lock_actions(&self) -> MutexGuard<'_, EventActions> {
        self.actions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy of the pending actions.
    pub fn actions(&self) -> EventActions {
        self.lock_actions().clone()
    }

    /// Take the pending actions, leaving none behind.
    pub fn take_actions(&self) -> EventActions {
        std::mem::take(&mut *self.lock_actions())
    }

    pub fn update_actions(&self, f: impl FnOnce(&mut EventActions)) {
        f(&mut self.lock_actions());
    }

    fn artifacts(&self) -> Result<&Arc<dyn ArtifactService>, ArborError> {
        self.invocation
            .artifact_service()
            .ok_or_else(|| ArborError::Configuration("artifact service is not configured".into()))
    }

    /// Save a new version of an artifact and record it on the pending actions.
    pub async fn save_artifact(&self, filename: &str, part: Part) -> Result<i64, ArborError> {
        let scope = self.invocation.artifact_scope();
        let version = self.artifacts()?.save(&scope, filename, part).await?;
        self.update_actions(|actions| {
            actions.artifact_delta.insert(filename.to_string(), version);
        });
        debug!(artifact = filename, version, "artifact saved");
        Ok(version)
    }

    /// Load an artifact; the latest version when `version` is `None`.
    pub async fn load_artifact(
        &self,
        filename: &str,
        version: Option<i64>,
    ) -> Result<Part, ArborError> {
        let scope = self.invocation.artifact_scope();
        self.artifacts()?.load(&scope, filename, version).await
    }

    pub async fn list_artifacts(&self) -> Result<Vec<String>, ArborError> {
        let scope = self.invocation.artifact_scope();
        self.artifacts()?.list(&scope).await
    }
}

/// State access through a [`CallbackContext`].
pub struct StateView<'a> {
    ctx: &'a CallbackContext,
}

impl StateView<'_> {
    /// Read a key: pending writes first, then the session.
    pub fn get(&self, key: &str) -> Result<serde_json::Value, ArborError> {
        if let Some(value) = self.ctx.lock_actions().state_delta.get(key) {
            return Ok(value.clone());
        }
        self.ctx
            .invocation
            .with_session(|s| s.state.get(key).cloned())
    }

    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<T, ArborError> {
        let value = self.get(key)?;
        serde_json::from_value(value)
            .map_err(|e| ArborError::state(key, format!("unexpected value type: {e}")))
    }

    /// Read a key, falling back to `default` when missing or ill-typed.
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get_as(key).unwrap_or(default)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_ok()
    }

    /// Record a write. It becomes durable when the carrying event is committed.
    pub fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.ctx.update_actions(|actions| {
            actions.state_delta.insert(key.into(), value);
        });
    }

    /// Session state with pending writes applied.
    pub fn snapshot(&self) -> State {
        let mut state = self.ctx.invocation.state();
        state.apply_delta(&self.ctx.lock_actions().state_delta);
        state
    }
}
