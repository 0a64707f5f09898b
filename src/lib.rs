//! Agentry: a manifest-driven conversational agent runner.
//!
//! Agents are declared in JSON or YAML manifests (prompt, model, function
//! schemas, actions). A [`session::Session`] drives an LLM backend, detects
//! function calls in its replies and dispatches them to REST or GraphQL
//! endpoints, message templates, a code sandbox, or handlers registered at
//! startup, feeding the results back until the turn settles.
//!
//! # Quick Start
//!
//! ```no_run
//! use agentry::prelude::*;
//!
//! # async fn example() -> agentry::error::Result<()> {
//! let config = AgentryConfig::load(None)?;
//! let mut app = Application::new(config)?;
//! app.open("weather").await?;
//! if let Some(reply) = app.ask("What's the weather in Tokyo?").await? {
//!     println!("{}", reply.text().unwrap_or_default());
//! }
//! # Ok(())
//! # }
//! ```

pub mod app;
pub mod articles;
pub mod config;
pub mod error;
pub mod functions;
pub mod history;
pub mod manifest;
pub mod models;
pub mod prelude;
pub mod provider;
pub mod sandbox;
pub mod session;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
