//! Workflow Execution Module
//!
//! Provides the engine that accepts steps, executes them on a single
//! background worker and reports their results.
//!
//! # Architecture
//!
//! - [`engine`]: Enqueue, lookups, the worker loop and shutdown
//! - [`step`]: The outbound HTTP call of one step
//! - [`callback`]: Aggregated result delivery to callback URLs

pub mod callback;
pub mod engine;
pub mod step;

pub use engine::{Engine, EngineStats, EnqueueRequest, EnqueueResponse};
