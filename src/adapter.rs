//! Pluggable execution backends: agent adapters and tool registries.
//!
//! Both are opaque executors behind a narrow async contract; the engine
//! never inspects their internals, only dispatches through these traits.

use crate::context::ExecutionContext;
use crate::workflow::Step;
use async_trait::async_trait;
use std::collections::HashMap;

/// Translates a step's `action`, resolved inputs, and per-agent hints into
/// a call against an AI-agent backend.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// Execute a single step against this agent. `resolved_inputs` has
    /// already had templates substituted and per-agent hints merged in
    /// (hints win on key collision).
    async fn execute_step(
        &self,
        step: &Step,
        resolved_inputs: &HashMap<String, serde_json::Value>,
        context: &ExecutionContext,
    ) -> anyhow::Result<serde_json::Value>;
}

/// A single registered tool, reachable via `<tool>.<operation>` actions.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn execute(
        &self,
        operation: &str,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value>;
}

/// Looks up tools by name, scoped to which agent is currently running.
pub trait ToolRegistry: Send + Sync {
    fn has_tool(&self, name: &str, agent_name: &str) -> bool;
    fn get_tool(&self, name: &str, agent_name: &str) -> Option<&dyn Tool>;
}
