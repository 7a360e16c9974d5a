//! Arbor: a multi-agent orchestration runtime.
//!
//! Agents (LLM-backed, workflow composites, custom closures, remote
//! proxies) form a tree. A [`Runner`](runner::Runner) drives the tree over
//! a session: it appends the user's message, streams the events agents
//! produce and commits each one, with its state changes, before the next
//! is produced.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use arbor::prelude::*;
//! use arbor::model::gemini::GeminiModel;
//! use futures::StreamExt;
//!
//! # async fn example() -> arbor::error::Result<()> {
//! let config = ArborConfig::from_env();
//! let model = Arc::new(GeminiModel::from_config("gemini-2.0-flash", &config)?);
//! let agent = LlmAgent::builder("assistant")
//!     .model(model)
//!     .instruction("Answer briefly.")
//!     .build()?;
//!
//! let sessions = Arc::new(InMemorySessionService::new());
//! let session = sessions.create(CreateSessionRequest::new("demo", "u1")).await?;
//! let runner = Runner::new(
//!     RunnerConfig::builder()
//!         .app_name("demo")
//!         .agent(Arc::new(agent))
//!         .session_service(sessions)
//!         .build(),
//! )?;
//!
//! let mut events = runner.run("u1", &session.id, Content::user("Hi!"), RunConfig::default());
//! while let Some(event) = events.next().await {
//!     let event = event?;
//!     println!("{}: {}", event.author, event.text());
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod artifact;
pub mod config;
pub mod error;
pub mod event;
pub mod memory;
pub mod model;
pub mod prelude;
pub mod runner;
pub mod session;
pub mod state;
pub mod tools;
pub mod types;
pub mod util;

pub use error::{ArborError, Result};
