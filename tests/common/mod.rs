//! Shared test helpers: a scripted model and runner setup.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::StreamExt;

use arbor::agent::Agent;
use arbor::config::RunConfig;
use arbor::error::ArborError;
use arbor::event::{Event, EventStream};
use arbor::model::{Llm, LlmRequest, LlmResponse, LlmResponseStream};
use arbor::runner::{Runner, RunnerConfig};
use arbor::session::{
    CreateSessionRequest, GetSessionRequest, InMemorySessionService, Session, SessionService,
};
use arbor::state::StateDelta;
use arbor::types::*;

pub const APP: &str = "test-app";
pub const USER: &str = "u1";

/// A model that replays queued turns and records every request.
///
/// Each turn is a list of responses: any number of partial chunks followed
/// by the complete response. When the script runs out it answers "done".
pub struct ScriptedLlm {
    name: String,
    turns: Mutex<VecDeque<Vec<LlmResponse>>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedLlm {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            turns: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a plain text answer.
    pub fn reply(self, text: &str) -> Self {
        self.turn(vec![LlmResponse::text(text)])
    }

    /// Queue a single function call.
    pub fn call(self, id: &str, name: &str, args: serde_json::Value) -> Self {
        self.turn(vec![function_call(id, name, args)])
    }

    /// Queue a streamed answer: one partial per chunk, then the whole text.
    pub fn streamed(self, chunks: &[&str]) -> Self {
        let mut turn: Vec<LlmResponse> = chunks
            .iter()
            .map(|chunk| LlmResponse {
                partial: true,
                ..LlmResponse::text(*chunk)
            })
            .collect();
        turn.push(LlmResponse::text(chunks.concat()));
        self.turn(turn)
    }

    pub fn turn(self, responses: Vec<LlmResponse>) -> Self {
        self.turns.lock().unwrap().push_back(responses);
        self
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> LlmRequest {
        self.requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .expect("model was never called")
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: LlmRequest,
        stream: bool,
    ) -> Result<LlmResponseStream, ArborError> {
        self.requests.lock().unwrap().push(request);
        let turn = self
            .turns
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| vec![LlmResponse::text("done")]);
        let responses: Vec<_> = turn
            .into_iter()
            .filter(|response| stream || !response.partial)
            .map(Ok)
            .collect();
        Ok(Box::pin(futures::stream::iter(responses)))
    }
}

pub fn function_call(id: &str, name: &str, args: serde_json::Value) -> LlmResponse {
    LlmResponse::new(Content::new(
        Role::Model,
        vec![Part::FunctionCall(FunctionCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        })],
    ))
}

pub fn function_response(id: &str, name: &str, response: serde_json::Value) -> Content {
    Content::new(
        Role::User,
        vec![Part::FunctionResponse(FunctionResponse::new(
            id, name, response,
        ))],
    )
}

/// A runner over a fresh in-memory session.
pub struct Harness {
    pub runner: Runner,
    pub sessions: Arc<InMemorySessionService>,
    pub session_id: String,
}

impl Harness {
    pub async fn new(agent: Arc<dyn Agent>) -> Self {
        Self::with_state(agent, StateDelta::new()).await
    }

    pub async fn with_state(agent: Arc<dyn Agent>, state: StateDelta) -> Self {
        let sessions = Arc::new(InMemorySessionService::new());
        let session = sessions
            .create(CreateSessionRequest::new(APP, USER).with_state(state))
            .await
            .unwrap();
        let runner = Runner::new(
            RunnerConfig::builder()
                .app_name(APP)
                .agent(agent)
                .session_service(sessions.clone())
                .build(),
        )
        .unwrap();
        Self {
            runner,
            sessions,
            session_id: session.id,
        }
    }

    pub fn stream(&self, content: Content, config: RunConfig) -> EventStream {
        self.runner.run(USER, &self.session_id, content, config)
    }

    /// Run to completion, panicking on the first error.
    pub async fn send(&self, text: &str) -> Vec<Event> {
        self.send_content(Content::user(text), RunConfig::default())
            .await
    }

    pub async fn send_content(&self, content: Content, config: RunConfig) -> Vec<Event> {
        collect(self.stream(content, config))
            .await
            .into_iter()
            .map(|item| item.unwrap())
            .collect()
    }

    pub async fn session(&self) -> Session {
        self.sessions
            .get(GetSessionRequest::new(APP, USER, &self.session_id))
            .await
            .unwrap()
    }
}

pub async fn collect(stream: EventStream) -> Vec<Result<Event, ArborError>> {
    stream.collect().await
}

/// Authors of the events, in order.
pub fn authors(events: &[Event]) -> Vec<String> {
    events.iter().map(|event| event.author.clone()).collect()
}

/// Text of every complete event that has some, in order.
pub fn texts(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter(|event| !event.partial && !event.text().is_empty())
        .map(Event::text)
        .collect()
}
