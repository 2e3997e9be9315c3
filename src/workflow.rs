//! The `Workflow`/`Step` input shape the engine consumes.
//!
//! These types are produced by an external parser (out of scope here); the
//! engine only needs the shape and the two helper predicates below.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Policy applied when a step fails and is not itself retried further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorHandling {
    /// Proceed to the next step.
    Continue,
    /// Terminate the run; status becomes failed.
    Stop,
    /// Terminate the run and invoke the rollback hook.
    Rollback,
}

impl Default for ErrorHandling {
    fn default() -> Self {
        ErrorHandling::Stop
    }
}

/// A declared workflow input parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputParameter {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

/// Per-step error-handling block; `max_retries` is clamped against the
/// engine's own ceiling (see [`crate::retry::RetryPolicy::effective_retries`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StepErrorHandling {
    pub max_retries: u32,
}

impl Default for StepErrorHandling {
    fn default() -> Self {
        Self { max_retries: 3 }
    }
}

/// A single workflow step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    /// Either `agent.<task>` or `<tool>.<operation>`.
    pub action: String,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub output_variable: Option<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
    #[serde(default)]
    pub error_handling: StepErrorHandling,
    /// Per-agent hints, merged over resolved inputs (hints win) before
    /// dispatch to the agent adapter.
    #[serde(default)]
    pub hints: HashMap<String, serde_json::Value>,
}

impl Step {
    /// Split `action` into `(kind, target)`, e.g. `"agent.summarize"` ->
    /// `("agent", "summarize")`, `"search.lookup"` -> `("search", "lookup")`.
    pub fn parse_action(&self) -> Option<(&str, &str)> {
        self.action.split_once('.')
    }

    pub fn is_agent_action(&self) -> bool {
        matches!(self.parse_action(), Some(("agent", _)))
    }
}

/// A validated, ordered sequence of steps plus metadata. Produced by an
/// external parser; the engine treats this as read-only input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub inputs: Vec<InputParameter>,
    #[serde(default)]
    pub required_tools: Vec<String>,
    /// Agent names this workflow is compatible with. An empty list means
    /// compatible with any agent.
    #[serde(default)]
    pub compatible_agents: Vec<String>,
    #[serde(default)]
    pub error_handling: ErrorHandling,
}

impl Workflow {
    pub fn get_required_tools(&self) -> &[String] {
        &self.required_tools
    }

    pub fn is_compatible_with(&self, agent_name: &str) -> bool {
        self.compatible_agents.is_empty()
            || self
                .compatible_agents
                .iter()
                .any(|name| name == agent_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_agent_actions() {
        let step = Step {
            id: "s1".into(),
            name: "summarize".into(),
            action: "agent.summarize".into(),
            inputs: HashMap::new(),
            output_variable: None,
            conditions: vec![],
            error_handling: StepErrorHandling::default(),
            hints: HashMap::new(),
        };
        assert!(step.is_agent_action());
        assert_eq!(step.parse_action(), Some(("agent", "summarize")));
    }

    #[test]
    fn parses_tool_actions() {
        let step = Step {
            id: "s1".into(),
            name: "echo".into(),
            action: "tool.echo".into(),
            inputs: HashMap::new(),
            output_variable: None,
            conditions: vec![],
            error_handling: StepErrorHandling::default(),
            hints: HashMap::new(),
        };
        assert!(!step.is_agent_action());
        assert_eq!(step.parse_action(), Some(("tool", "echo")));
    }

    #[test]
    fn empty_compatible_agents_means_universally_compatible() {
        let workflow = Workflow {
            id: "w1".into(),
            name: "test".into(),
            steps: vec![],
            inputs: vec![],
            required_tools: vec![],
            compatible_agents: vec![],
            error_handling: ErrorHandling::default(),
        };
        assert!(workflow.is_compatible_with("anything"));
    }
}
