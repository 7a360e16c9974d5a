//! The orchestrator: drives one agent tree over a session, one run at a time.
//!
//! A run appends the user's message, picks the agent that should answer,
//! pumps its event stream and commits every non-partial event to the
//! session service before pulling the next one. Agents therefore always
//! observe the effects of everything emitted before.

use std::sync::Arc;

use bon::Builder;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::context::InvocationParams;
use crate::agent::{agent_path, find_agent, validate_tree, Agent, InvocationContext};
use crate::artifact::{ArtifactScope, ArtifactService};
use crate::config::RunConfig;
use crate::error::ArborError;
use crate::event::{Event, EventStream, USER_AUTHOR};
use crate::memory::MemoryService;
use crate::session::{GetSessionRequest, Session, SessionService};
use crate::types::{Content, Part, Usage};

/// Wiring of a [`Runner`].
#[derive(Builder)]
pub struct RunnerConfig {
    #[builder(into)]
    pub app_name: String,
    pub agent: Arc<dyn Agent>,
    pub session_service: Arc<dyn SessionService>,
    pub artifact_service: Option<Arc<dyn ArtifactService>>,
    pub memory_service: Option<Arc<dyn MemoryService>>,
}

/// Runs an agent tree against stored sessions.
#[derive(Clone)]
pub struct Runner {
    app_name: String,
    agent: Arc<dyn Agent>,
    session_service: Arc<dyn SessionService>,
    artifact_service: Option<Arc<dyn ArtifactService>>,
    memory_service: Option<Arc<dyn MemoryService>>,
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("app_name", &self.app_name)
            .field("agent", &self.agent.name())
            .finish()
    }
}

/// Whether control may have reached `name` through LLM transfers: every
/// agent from the root down to it takes part in transfer and, below the
/// root, allows transferring back to its parent.
fn reachable_by_transfer(root: &Arc<dyn Agent>, name: &str) -> bool {
    let Some(path) = agent_path(root, name) else {
        return false;
    };
    path.iter().enumerate().all(|(depth, agent)| match agent.transfer_options() {
        Some(options) => depth == 0 || !options.disallow_transfer_to_parent,
        None => false,
    })
}

/// Pick the agent that handles a new user message.
///
/// A function response goes to the agent that issued the call. Otherwise
/// the conversation continues with the latest agent reached by transfer,
/// falling back to the root.
fn resolve_agent(root: &Arc<dyn Agent>, session: &Session, content: &Content) -> Arc<dyn Agent> {
    let responses = content.function_responses();
    if let Some(response) = responses.first() {
        let caller = session.events.iter().rev().find(|event| {
            event.content.as_ref().is_some_and(|c| {
                c.function_calls().iter().any(|call| call.id == response.id)
            })
        });
        if let Some(agent) = caller.and_then(|event| find_agent(root, &event.author)) {
            return agent;
        }
    }

    for event in session.events.iter().rev() {
        if event.author == USER_AUTHOR {
            continue;
        }
        if event.author == root.name() {
            return root.clone();
        }
        if reachable_by_transfer(root, &event.author) {
            if let Some(agent) = find_agent(root, &event.author) {
                return agent;
            }
        }
    }
    root.clone()
}

impl Runner {
    /// Validates the agent tree.
    pub fn new(config: RunnerConfig) -> Result<Self, ArborError> {
        validate_tree(&config.agent)?;
        Ok(Self {
            app_name: config.app_name,
            agent: config.agent,
            session_service: config.session_service,
            artifact_service: config.artifact_service,
            memory_service: config.memory_service,
        })
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }

    pub fn session_service(&self) -> &Arc<dyn SessionService> {
        &self.session_service
    }

    /// Process one user message. See [`Runner::run_with_cancel`].
    pub fn run(
        &self,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        content: Content,
        run_config: RunConfig,
    ) -> EventStream {
        self.run_with_cancel(
            user_id,
            session_id,
            content,
            run_config,
            CancellationToken::new(),
        )
    }

    /// Process one user message, returning the committed events (and
    /// uncommitted partial events) as they happen.
    ///
    /// Cancelling `cancel` stops the run at the next await point: in-flight
    /// agents are dropped and the stream ends with [`ArborError::Canceled`].
    /// Already committed events stay committed; `temp:` keys never leave the
    /// run.
    pub fn run_with_cancel(
        &self,
        user_id: impl Into<String>,
        session_id: impl Into<String>,
        content: Content,
        run_config: RunConfig,
        cancel: CancellationToken,
    ) -> EventStream {
        let runner = self.clone();
        let user_id = user_id.into();
        let session_id = session_id.into();

        Box::pin(async_stream::stream! {
            let request = GetSessionRequest::new(&runner.app_name, &user_id, &session_id);
            let mut session = match runner.session_service.get(request).await {
                Ok(session) => session,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            let invocation_id = format!("e-{}", Uuid::new_v4());
            info!(
                invocation_id = %invocation_id,
                app = %runner.app_name,
                session_id = %session_id,
                "run started"
            );

            let mut content = content;
            let mut user_event = Event::new(&invocation_id, USER_AUTHOR);
            if run_config.save_input_blobs_as_artifacts {
                match runner.save_blobs(&session, &invocation_id, &mut content).await {
                    Ok(saved) => user_event.actions.artifact_delta.extend(saved),
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }

            let agent = resolve_agent(&runner.agent, &session, &content);
            user_event.content = Some(content.clone());
            if let Err(err) = runner.session_service.append_event(&mut session, user_event).await {
                yield Err(err);
                return;
            }

            let ctx = InvocationContext::new(InvocationParams {
                invocation_id: invocation_id.clone(),
                root: runner.agent.clone(),
                agent: agent.clone(),
                session: session.clone(),
                session_service: runner.session_service.clone(),
                artifact_service: runner.artifact_service.clone(),
                memory_service: runner.memory_service.clone(),
                user_content: Some(content),
                run_config,
                cancel: cancel.clone(),
            });

            debug!(invocation_id = %invocation_id, agent = %agent.name(), "dispatching");
            let mut events = agent.clone().run(ctx.clone());
            let mut usage = Usage::default();
            loop {
                let polled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    item = events.next() => Some(item),
                };
                let event = match polled {
                    None => {
                        warn!(invocation_id = %invocation_id, "run canceled");
                        yield Err(ArborError::Canceled);
                        return;
                    }
                    Some(Some(Ok(event))) => event,
                    Some(Some(Err(err))) => {
                        warn!(invocation_id = %invocation_id, error = %err, "run failed");
                        yield Err(err);
                        return;
                    }
                    Some(None) => break,
                };
                if event.partial {
                    yield Ok(event);
                    continue;
                }

                let applied = event.actions.state_delta.clone();
                let persisted = match runner.session_service.append_event(&mut session, event).await {
                    Ok(persisted) => persisted,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                ctx.absorb(&applied, persisted.clone());
                if let Some(event_usage) = &persisted.usage {
                    usage.merge(event_usage);
                }
                let transfer = persisted.actions.transfer_to_agent.clone();
                yield Ok(persisted);

                if let Some(target) = transfer {
                    let next_agent = match find_agent(&runner.agent, &target) {
                        Some(agent) => agent,
                        None => {
                            warn!(invocation_id = %invocation_id, target = %target, "unknown transfer target");
                            yield Err(ArborError::Transfer(target));
                            return;
                        }
                    };
                    info!(invocation_id = %invocation_id, target = %target, "transferring");
                    events = next_agent.clone().run(ctx.with_agent(next_agent));
                }
            }
            info!(
                invocation_id = %invocation_id,
                llm_calls = ctx.llm_calls(),
                total_tokens = usage.total_tokens,
                "run finished"
            );
        })
    }

    /// Replace inline blobs of `content` with a placeholder after saving
    /// each as an artifact. Returns the saved versions by file name.
    async fn save_blobs(
        &self,
        session: &Session,
        invocation_id: &str,
        content: &mut Content,
    ) -> Result<Vec<(String, i64)>, ArborError> {
        let Some(artifacts) = &self.artifact_service else {
            return Err(ArborError::Configuration(
                "save_input_blobs_as_artifacts requires an artifact service".into(),
            ));
        };
        let scope = ArtifactScope::new(&session.app_name, &session.user_id, &session.id);
        let mut saved = Vec::new();
        for (index, part) in content.parts.iter_mut().enumerate() {
            if !matches!(part, Part::InlineData(_)) {
                continue;
            }
            let filename = format!("artifact_{invocation_id}_{index}");
            let version = artifacts.save(&scope, &filename, part.clone()).await?;
            *part = Part::text(format!(
                "Uploaded file: {filename}. It is saved into artifacts"
            ));
            saved.push((filename, version));
        }
        Ok(saved)
    }

    /// Hand a session to the memory service for later recall.
    pub async fn save_session_to_memory(
        &self,
        user_id: &str,
        session_id: &str,
    ) -> Result<(), ArborError> {
        let memory = self
            .memory_service
            .as_ref()
            .ok_or_else(|| ArborError::Configuration("memory service is not configured".into()))?;
        let session = self
            .session_service
            .get(GetSessionRequest::new(&self.app_name, user_id, session_id))
            .await?;
        memory.add_session(&session).await
    }
}
