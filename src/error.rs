//! Structured error types for the workflow engine.
//!
//! Mirrors the error taxonomy in §7: validation failures never retry,
//! configuration/dispatch errors surface from the step loop and are subject
//! to the workflow's error-handling policy, and catastrophic engine errors
//! (state-store or logger I/O) are converted into a failed run rather than
//! propagated to the caller.

use thiserror::Error;

/// Top-level error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// One or more pre-run validation checks failed.
    #[error("workflow validation failed: {0}")]
    Validation(String),

    /// The circuit breaker denied execution before a run could start.
    #[error("circuit open: too many recent failures")]
    CircuitOpen,

    /// No agent adapter was configured but a step required one.
    #[error("no agent adapter configured")]
    NoAgentAdapter,

    /// No tool registry was configured but a step required one.
    #[error("no tool registry configured")]
    NoToolRegistry,

    /// A `<tool>.<operation>` action referenced a tool not present in the registry.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// An `action` string did not parse as `agent.<task>` or `<tool>.<operation>`.
    #[error("malformed step action: {0}")]
    MalformedAction(String),

    /// The agent adapter or tool raised an error while executing a step.
    #[error("step execution failed: {0}")]
    StepExecution(String),

    /// Template or condition resolution failed unexpectedly.
    #[error("template resolution failed: {0}")]
    Template(String),

    /// The run was cancelled via `Engine::cancel`.
    #[error("cancelled")]
    Cancelled,

    /// Durable state-store operation failed.
    #[error("state store error: {0}")]
    StateStore(#[from] crate::state::StateStoreError),

    /// Execution log operation failed.
    #[error("execution logger error: {0}")]
    Logger(#[from] crate::logger::LoggerError),

    /// Config parsing failed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Wraps an I/O failure with no more specific category.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
