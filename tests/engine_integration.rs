//! End-to-end integration tests for the engine driver loop.
//!
//! These exercise the scenarios from the engine's worked examples: happy
//! path, retry-then-succeed, retry exhaustion, rollback, resume after a
//! simulated crash, and circuit-open refusal.

use conductor::config::EngineConfig;
use conductor::engine::EngineBuilder;
use conductor::logger::FileExecutionLogger;
use conductor::result::{RunStatus, StepStatus};
use conductor::retry::RetryPolicy;
use conductor::state::FileStateStore;
use conductor::testing::{MockAgentAdapter, MockTool, MockToolRegistry, TestFixtures};
use conductor::workflow::{ErrorHandling, Step, StepErrorHandling, Workflow};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn harness(dir: &std::path::Path) -> (Arc<FileStateStore>, Arc<FileExecutionLogger>) {
    (
        Arc::new(FileStateStore::new(dir.join("state"))),
        Arc::new(FileExecutionLogger::new(dir.join("logs"))),
    )
}

#[tokio::test]
async fn happy_path_chains_variables_through_steps() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, logger) = harness(dir.path());

    let tools = MockToolRegistry::new()
        .with_tool("echo", MockTool::new().queue_success("run", serde_json::json!("hello")))
        .with_tool("upper", MockTool::new().queue_success("run", serde_json::json!("HELLO")));

    let engine = EngineBuilder::new(state_store, logger)
        .tool_registry(Arc::new(tools))
        .build();

    let workflow = TestFixtures::happy_path_workflow();
    let result = engine.execute(&workflow, None, None, None).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.final_output.get("greeting"), Some(&serde_json::json!("hello")));
    assert_eq!(result.step_results.len(), 2);
    assert_eq!(result.step_results[1].output, Some(serde_json::json!("HELLO")));
}

fn echo_upper_workflow(max_retries: u32, error_handling: ErrorHandling) -> Workflow {
    Workflow {
        id: "retry-demo".to_string(),
        name: "Retry Demo".to_string(),
        steps: vec![Step {
            id: "step-1".to_string(),
            name: "flaky".to_string(),
            action: "tool.run".to_string(),
            inputs: HashMap::new(),
            output_variable: Some("result".to_string()),
            conditions: vec![],
            error_handling: StepErrorHandling { max_retries },
            hints: HashMap::new(),
        }],
        inputs: vec![],
        required_tools: vec!["tool".to_string()],
        compatible_agents: vec![],
        error_handling,
    }
}

#[tokio::test]
async fn retry_then_succeed_reports_retry_count() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, logger) = harness(dir.path());

    let tool = MockTool::new()
        .queue_failure("run", "first failure")
        .queue_failure("run", "second failure")
        .queue_success("run", serde_json::json!("ok"));
    let tools = MockToolRegistry::new().with_tool("tool", tool);

    let config = EngineConfig {
        retry: RetryPolicy {
            jitter: 0.0,
            base_delay: 0.001,
            max_delay: 1.0,
            ..RetryPolicy::default()
        },
        ..EngineConfig::default()
    };

    let engine = EngineBuilder::new(state_store, logger)
        .tool_registry(Arc::new(tools))
        .config(config)
        .build();

    let workflow = echo_upper_workflow(3, ErrorHandling::Stop);
    let result = engine.execute(&workflow, None, None, None).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.step_results[0].retries, 2);
    assert_eq!(result.final_output.get("result"), Some(&serde_json::json!("ok")));
}

#[tokio::test]
async fn retry_exhaustion_with_stop_halts_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, logger) = harness(dir.path());

    let tool = MockTool::new()
        .queue_failure("run", "fail-1")
        .queue_failure("run", "fail-2")
        .queue_failure("run", "fail-3");
    let tools = MockToolRegistry::new().with_tool("tool", tool);

    let config = EngineConfig {
        retry: RetryPolicy {
            jitter: 0.0,
            base_delay: 0.001,
            max_delay: 1.0,
            ..RetryPolicy::default()
        },
        ..EngineConfig::default()
    };

    let engine = EngineBuilder::new(state_store, logger)
        .tool_registry(Arc::new(tools))
        .config(config)
        .build();

    let workflow = echo_upper_workflow(2, ErrorHandling::Stop);
    let result = engine.execute(&workflow, None, None, None).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.step_results.len(), 1);
    assert_eq!(result.step_results[0].status, StepStatus::Failed);
    assert_eq!(result.step_results[0].retries, 2);
}

#[tokio::test]
async fn rollback_policy_invokes_hook_with_prior_results() {
    use async_trait::async_trait;
    use conductor::context::ExecutionContext;
    use conductor::engine::RollbackHook;
    use conductor::result::StepResult;
    use std::sync::Mutex;

    struct RecordingRollback {
        invocations: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl RollbackHook for RecordingRollback {
        async fn rollback(&self, step_results: &[StepResult], _context: &ExecutionContext) {
            self.invocations.lock().unwrap().push(step_results.len());
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let (state_store, logger) = harness(dir.path());

    let tools = MockToolRegistry::new()
        .with_tool("a", MockTool::new().queue_success("run", serde_json::json!("ok")))
        .with_tool("b", MockTool::new().queue_success("run", serde_json::json!("ok")))
        .with_tool("c", MockTool::new().queue_failure("run", "boom"));

    let rollback = Arc::new(RecordingRollback {
        invocations: Mutex::new(Vec::new()),
    });

    let engine = EngineBuilder::new(state_store, logger)
        .tool_registry(Arc::new(tools))
        .rollback_hook(rollback.clone())
        .build();

    let step = |id: &str, action: &str| Step {
        id: id.to_string(),
        name: id.to_string(),
        action: action.to_string(),
        inputs: HashMap::new(),
        output_variable: None,
        conditions: vec![],
        error_handling: StepErrorHandling { max_retries: 0 },
        hints: HashMap::new(),
    };

    let workflow = Workflow {
        id: "rollback-demo".to_string(),
        name: "Rollback Demo".to_string(),
        steps: vec![
            step("s1", "a.run"),
            step("s2", "b.run"),
            step("s3", "c.run"),
        ],
        inputs: vec![],
        required_tools: vec![],
        compatible_agents: vec![],
        error_handling: ErrorHandling::Rollback,
    };

    let result = engine.execute(&workflow, None, None, None).await.unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.step_results.len(), 3);
    assert_eq!(*rollback.invocations.lock().unwrap(), vec![3]);
}

#[tokio::test]
async fn resume_does_not_redispatch_completed_steps() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, logger) = harness(dir.path());

    let step = |id: &str, out: &str| Step {
        id: id.to_string(),
        name: id.to_string(),
        action: "tool.run".to_string(),
        inputs: HashMap::new(),
        output_variable: Some(out.to_string()),
        conditions: vec![],
        error_handling: StepErrorHandling { max_retries: 0 },
        hints: HashMap::new(),
    };

    let workflow = Workflow {
        id: "resume-demo".to_string(),
        name: "Resume Demo".to_string(),
        steps: vec![
            step("s1", "v1"),
            step("s2", "v2"),
            step("s3", "v3"),
            step("s4", "v4"),
        ],
        inputs: vec![],
        required_tools: vec![],
        compatible_agents: vec![],
        error_handling: ErrorHandling::Stop,
    };

    // First attempt: step 3 fails, simulating a crash after steps 1-2 checkpoint.
    let failing_tool = MockTool::new()
        .queue_success("run", serde_json::json!("out-1"))
        .queue_success("run", serde_json::json!("out-2"))
        .queue_failure("run", "crash");
    let tools = MockToolRegistry::new().with_tool("tool", failing_tool);
    let engine = EngineBuilder::new(state_store.clone(), logger.clone())
        .tool_registry(Arc::new(tools))
        .build();

    let first = engine.execute(&workflow, None, None, None).await.unwrap();
    assert_eq!(first.status, RunStatus::Failed);
    assert_eq!(first.step_results.len(), 3);

    // Resume: steps 1-2 must not redispatch; step 3 and 4 now succeed.
    let resuming_adapter = MockAgentAdapter::new();
    let resuming_tool = MockTool::new()
        .queue_success("run", serde_json::json!("out-3"))
        .queue_success("run", serde_json::json!("out-4"));
    let resuming_tools = MockToolRegistry::new().with_tool("tool", resuming_tool);
    let resuming_engine = EngineBuilder::new(state_store, logger)
        .agent_adapter(Arc::new(resuming_adapter))
        .tool_registry(Arc::new(resuming_tools))
        .build();

    let resumed = resuming_engine
        .execute(&workflow, None, None, Some(first.run_id.clone()))
        .await
        .unwrap();

    assert_eq!(resumed.run_id, first.run_id);
    assert_eq!(resumed.status, RunStatus::Completed);
    // Only steps 3 and 4 were dispatched this time.
    assert_eq!(resumed.step_results.len(), 2);
    assert_eq!(resumed.final_output.get("v1"), Some(&serde_json::json!("out-1")));
    assert_eq!(resumed.final_output.get("v2"), Some(&serde_json::json!("out-2")));
    assert_eq!(resumed.final_output.get("v3"), Some(&serde_json::json!("out-3")));
    assert_eq!(resumed.final_output.get("v4"), Some(&serde_json::json!("out-4")));
}

#[tokio::test]
async fn circuit_open_refuses_after_threshold_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, logger) = harness(dir.path());

    let tools = MockToolRegistry::new().with_tool("tool", MockTool::new().queue_failure("run", "x"));
    let config = EngineConfig {
        circuit_breaker: conductor::circuit_breaker::CircuitBreakerConfig {
            failure_threshold: 2,
            recovery_timeout: Duration::from_secs(30),
            half_open_max_calls: 1,
        },
        retry: RetryPolicy {
            max_retries: 0,
            jitter: 0.0,
            ..RetryPolicy::default()
        },
        ..EngineConfig::default()
    };
    let engine = EngineBuilder::new(state_store, logger)
        .tool_registry(Arc::new(tools))
        .config(config)
        .build();

    let workflow = echo_upper_workflow(0, ErrorHandling::Stop);
    let first = engine.execute(&workflow, None, None, None).await.unwrap();
    let second = engine.execute(&workflow, None, None, None).await.unwrap();
    assert_eq!(first.status, RunStatus::Failed);
    assert_eq!(second.status, RunStatus::Failed);

    let third = engine.execute(&workflow, None, None, None).await.unwrap();
    assert_eq!(third.status, RunStatus::Failed);
    assert!(third.error.as_deref().unwrap_or("").contains("circuit"));
    assert!(third.step_results.is_empty());
}

#[tokio::test]
async fn empty_workflow_completes_with_inputs_as_final_output() {
    let dir = tempfile::tempdir().unwrap();
    let (state_store, logger) = harness(dir.path());
    let engine = EngineBuilder::new(state_store, logger).build();

    let workflow = TestFixtures::empty_workflow();
    let mut inputs = HashMap::new();
    inputs.insert("x".to_string(), serde_json::json!("y"));

    let result = engine.execute(&workflow, Some(inputs.clone()), None, None).await.unwrap();

    assert_eq!(result.status, RunStatus::Completed);
    assert!(result.step_results.is_empty());
    assert_eq!(result.final_output, inputs);
}
