//! Durable - Minimal Durable-Execution Engine
//!
//! Accepts deferred HTTP "steps", groups them into workflows, executes them
//! one at a time from a bounded queue and, when a step carries a callback
//! URL, posts the aggregated results of its workflow to that URL. Clients
//! read a workflow back either by id or with a signed, expiring read token.
//!
//! # Architecture
//!
//! The library is organized into these modules:
//!
//! - [`store`]: Concurrent key-value store whose entries expire after a TTL
//! - [`token`]: Ed25519-signed, base58-encoded workflow read tokens
//! - [`workflow`]: Workflow and step records
//! - [`execution`]: Queue, worker, step dispatch and callback aggregation
//! - [`server`]: JSON HTTP API over the engine
//! - [`config`]: Engine and server settings
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use durable::execution::EnqueueRequest;
//! use durable::workflow::StepRequest;
//! use durable::{Engine, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> durable::Result<()> {
//!     let engine = Arc::new(Engine::new(EngineConfig::default())?);
//!
//!     let worker = Arc::clone(&engine);
//!     tokio::spawn(async move { worker.run().await });
//!
//!     let request = StepRequest::new("GET", "https://example.com/data");
//!     let accepted = engine
//!         .enqueue(EnqueueRequest::new("data", request).with_callback("https://example.com/hook"))
//!         .await?;
//!     println!("read token: {}", accepted.read_workflow_token);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod execution;
pub mod server;
pub mod store;
pub mod token;
pub mod workflow;

// Re-export commonly used types
pub use config::{EngineConfig, ServerConfig};
pub use error::{Error, Result};
pub use execution::Engine;
pub use token::TokenManager;
pub use workflow::{Step, Workflow};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "Durable";
