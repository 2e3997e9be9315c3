//! Per-run execution context: variable scope, agent identity, config.
//!
//! Lives only for the duration of a single run; never persisted directly
//! (its contents are projected into `StepCheckpoint`s and the final
//! `WorkflowResult` as the run proceeds).

use crate::cancellation::CancellationHandle;
use crate::config::EngineConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Describes what an agent backend can do; used by the workflow's
/// compatibility predicate and surfaced to adapters for their own dispatch
/// decisions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentCapabilities {
    pub name: String,
    pub version: String,
    pub provider: String,
    pub supports_tool_calling: bool,
    pub supports_reasoning: bool,
}

pub struct ExecutionContext {
    pub run_id: String,
    pub workflow_id: String,
    pub agent_name: String,
    pub capabilities: AgentCapabilities,
    pub inputs: HashMap<String, serde_json::Value>,
    pub variables: HashMap<String, serde_json::Value>,
    pub current_step_index: usize,
    pub started_at: DateTime<Utc>,
    pub config: EngineConfig,
    pub cancellation: CancellationHandle,
}

impl ExecutionContext {
    pub fn new(
        run_id: impl Into<String>,
        workflow_id: impl Into<String>,
        agent_name: impl Into<String>,
        capabilities: AgentCapabilities,
        inputs: HashMap<String, serde_json::Value>,
        config: EngineConfig,
        cancellation: CancellationHandle,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            workflow_id: workflow_id.into(),
            agent_name: agent_name.into(),
            capabilities,
            variables: inputs.clone(),
            inputs,
            current_step_index: 0,
            started_at: Utc::now(),
            config,
            cancellation,
        }
    }

    /// Bind a step's output into `variables` under its declared name.
    /// `variables` only grows during a run.
    pub fn bind_output(&mut self, name: &str, value: serde_json::Value) {
        self.variables.insert(name.to_string(), value);
    }

    pub fn template_context(&self) -> crate::template::TemplateContext<'_> {
        crate::template::TemplateContext {
            inputs: &self.inputs,
            variables: &self.variables,
        }
    }
}
