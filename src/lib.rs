//! # conductor
//!
//! A workflow execution engine that orchestrates declarative, multi-step
//! workflows against pluggable AI-agent backends and tool registries. A
//! workflow is a validated, directed sequence of steps; each step invokes
//! either an agent task or a registered tool, may be conditional on prior
//! outputs, may consume and produce named variables, and carries its own
//! retry policy.
//!
//! The crate drives a workflow to completion, recording durable progress so
//! an interrupted run can resume where it stopped, and protects downstream
//! collaborators with a circuit breaker and exponential-backoff retries.
//!
//! ## Modules
//!
//! - `engine` - the driver loop: validation, step dispatch, retry, checkpoints, rollback
//! - `retry` - exponential backoff with jitter and cap
//! - `circuit_breaker` - the three-state failure isolator gating execution
//! - `state` - durable execution records and per-step checkpoints
//! - `logger` - append-only structured event log per run
//! - `context` - per-run variable scope and agent identity
//! - `template` - `{{name}}` / `{{name.path}}` placeholder resolution
//! - `condition` - the intentionally narrow `==` / `>=` condition grammar
//! - `workflow` - the `Workflow`/`Step` input shape
//! - `adapter` - the agent adapter and tool registry contracts
//! - `config` - typed engine configuration
//! - `result` - `StepResult` / `WorkflowResult`
//! - `cancellation` - cooperative cancellation handle
//! - `logging` - opt-in `tracing-subscriber` initializer for embedding binaries
//! - `testing` - in-process mocks for the engine's collaborators

pub mod adapter;
pub mod cancellation;
pub mod circuit_breaker;
pub mod condition;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod logger;
pub mod logging;
pub mod result;
pub mod retry;
pub mod state;
pub mod template;
pub mod workflow;

pub mod testing;

pub use engine::{Engine, EngineBuilder};
pub use error::{EngineError, Result};
pub use result::{RunStatus, StepResult, WorkflowResult};
pub use workflow::{Step, Workflow};
