//! # Callflow
//!
//! Callflow is an async orchestration engine for graphs of remote interface calls.
//! It runs the calls of one request (upload, predict, poll, fetch result...) as a
//! directed acyclic graph and feeds earlier results into later calls.
//!
//! ## Core Features
//!
//! - **Concurrent Graph Execution**: Roots and independent branches run concurrently on `tokio`
//! - **Result Back-References**: `{{#nodeId.path}}` in parameters resolves against earlier results
//! - **Retry and Polling**: Bounded retries for flaky calls, conditional polling for async jobs
//! - **Structured Logs**: Every transition and interface call is reported through a log sink
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use callflow::{EngineBuilder, EnvironmentVariables, GraphDefinition};
//!
//! let engine = EngineBuilder::new().build()?;
//!
//! let graph = GraphDefinition::from_json(json_str)?;
//! let scheduler = engine.run(&graph, EnvironmentVariables::new(token)).await?;
//! for (nid, result) in scheduler.results() {
//!     println!("{}: {}", nid, result);
//! }
//! ```

mod builder;
mod common;
mod config;
mod engine;
mod error;
pub mod executor;
mod model;
mod runtime;
mod scheduler;
pub mod template;
mod utils;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use config::*;
pub use engine::Engine;
pub use error::CallflowError;
pub use model::*;
pub use runtime::{CallContext, CallState, LogChannel, LogLevel, LogRecord, LogSink};
pub use scheduler::{CallGraph, GraphScheduler, NodePhase, NodeTransition, PollPlan, Strategy, TransitionHandle, root_set};

/// Result type alias for Callflow operations.
pub type Result<T> = std::result::Result<T, CallflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;
