//! In-process mocks for the engine's four collaborators, used by the
//! engine's own tests and exported for downstream consumers who embed the
//! engine in their own test suites.
//!
//! Mirrors the teacher's builder-pattern mocks (`MockGitBuilder`,
//! `MockClaudeBuilder`): construct with defaults, chain `.with_*` calls to
//! script specific responses.

use crate::adapter::{AgentAdapter, Tool, ToolRegistry};
use crate::context::ExecutionContext;
use crate::workflow::Step;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// An agent adapter that returns scripted responses keyed by step id, or
/// echoes the resolved inputs back if no script entry matches.
pub struct MockAgentAdapter {
    responses: HashMap<String, anyhow::Result<serde_json::Value>>,
    calls: Mutex<Vec<String>>,
}

impl Default for MockAgentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAgentAdapter {
    pub fn new() -> Self {
        Self {
            responses: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_response(mut self, step_id: impl Into<String>, output: serde_json::Value) -> Self {
        self.responses.insert(step_id.into(), Ok(output));
        self
    }

    pub fn with_failure(mut self, step_id: impl Into<String>, error: impl Into<String>) -> Self {
        self.responses
            .insert(step_id.into(), Err(anyhow::anyhow!(error.into())));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("mock lock poisoned").clone()
    }
}

#[async_trait]
impl AgentAdapter for MockAgentAdapter {
    async fn execute_step(
        &self,
        step: &Step,
        resolved_inputs: &HashMap<String, serde_json::Value>,
        _context: &ExecutionContext,
    ) -> anyhow::Result<serde_json::Value> {
        self.calls.lock().expect("mock lock poisoned").push(step.id.clone());
        match self.responses.get(&step.id) {
            Some(Ok(value)) => Ok(value.clone()),
            Some(Err(err)) => Err(anyhow::anyhow!(err.to_string())),
            None => Ok(serde_json::to_value(resolved_inputs).unwrap_or(serde_json::Value::Null)),
        }
    }
}

/// A scripted tool: each call to `execute` consumes the next queued result
/// for that operation, falling back to a plain echo once the queue is
/// empty. Useful for the retry-then-succeed and retry-exhaustion scenarios.
pub struct MockTool {
    queued: Mutex<HashMap<String, Vec<anyhow::Result<serde_json::Value>>>>,
}

impl Default for MockTool {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTool {
    pub fn new() -> Self {
        Self {
            queued: Mutex::new(HashMap::new()),
        }
    }

    pub fn queue_failure(self, operation: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        self.queued
            .lock()
            .expect("mock lock poisoned")
            .entry(operation.into())
            .or_default()
            .push(Err(anyhow::anyhow!(error)));
        self
    }

    pub fn queue_success(self, operation: impl Into<String>, output: serde_json::Value) -> Self {
        self.queued
            .lock()
            .expect("mock lock poisoned")
            .entry(operation.into())
            .or_default()
            .push(Ok(output));
        self
    }
}

#[async_trait]
impl Tool for MockTool {
    async fn execute(
        &self,
        operation: &str,
        inputs: &HashMap<String, serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let mut queued = self.queued.lock().expect("mock lock poisoned");
        if let Some(queue) = queued.get_mut(operation) {
            if !queue.is_empty() {
                return queue.remove(0).map_err(|e| anyhow::anyhow!(e.to_string()));
            }
        }
        Ok(serde_json::to_value(inputs).unwrap_or(serde_json::Value::Null))
    }
}

/// An in-memory tool registry over boxed [`MockTool`]s (or any other
/// [`Tool`] impl), compatible with every agent name.
#[derive(Default)]
pub struct MockToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl MockToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tool(mut self, name: impl Into<String>, tool: impl Tool + 'static) -> Self {
        self.tools.insert(name.into(), Box::new(tool));
        self
    }
}

impl ToolRegistry for MockToolRegistry {
    fn has_tool(&self, name: &str, _agent_name: &str) -> bool {
        self.tools.contains_key(name)
    }

    fn get_tool(&self, name: &str, _agent_name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|boxed| boxed.as_ref())
    }
}

/// Canned workflows and fixtures used across the engine's own test suite,
/// mirroring the teacher's static `TestFixtures` factory methods.
pub struct TestFixtures;

impl TestFixtures {
    /// The §8 happy-path workflow: echo then uppercase, chained through a
    /// variable.
    pub fn happy_path_workflow() -> crate::workflow::Workflow {
        use crate::workflow::{ErrorHandling, Step, StepErrorHandling, Workflow};

        Workflow {
            id: "happy-path".to_string(),
            name: "Happy Path".to_string(),
            steps: vec![
                Step {
                    id: "step-1".to_string(),
                    name: "echo".to_string(),
                    action: "echo.run".to_string(),
                    inputs: HashMap::from([("x".to_string(), serde_json::json!("hello"))]),
                    output_variable: Some("greeting".to_string()),
                    conditions: vec![],
                    error_handling: StepErrorHandling::default(),
                    hints: HashMap::new(),
                },
                Step {
                    id: "step-2".to_string(),
                    name: "upper".to_string(),
                    action: "upper.run".to_string(),
                    inputs: HashMap::from([(
                        "s".to_string(),
                        serde_json::json!("{{greeting}}"),
                    )]),
                    output_variable: Some("shouted".to_string()),
                    conditions: vec![],
                    error_handling: StepErrorHandling::default(),
                    hints: HashMap::new(),
                },
            ],
            inputs: vec![],
            required_tools: vec!["echo".to_string(), "upper".to_string()],
            compatible_agents: vec![],
            error_handling: ErrorHandling::Stop,
        }
    }

    pub fn empty_workflow() -> crate::workflow::Workflow {
        crate::workflow::Workflow {
            id: "empty".to_string(),
            name: "Empty".to_string(),
            steps: vec![],
            inputs: vec![],
            required_tools: vec![],
            compatible_agents: vec![],
            error_handling: crate::workflow::ErrorHandling::Stop,
        }
    }
}
