//! The engine driver loop: validation, step dispatch, retry, checkpoints,
//! condition evaluation, rollback, and finalization.

use crate::adapter::{AgentAdapter, ToolRegistry};
use crate::cancellation::CancellationHandle;
use crate::circuit_breaker::CircuitBreaker;
use crate::condition;
use crate::config::EngineConfig;
use crate::context::{AgentCapabilities, ExecutionContext};
use crate::error::{EngineError, Result};
use crate::logger::ExecutionLogger;
use crate::result::{RunStatus, StepResult, StepStatus as ResultStepStatus, WorkflowResult};
use crate::retry::RetryPolicy;
use crate::state::{ExecutionRecord, ExecutionStatus, StateStore, StepCheckpoint, StepStatus};
use crate::template;
use crate::workflow::{ErrorHandling, Step, Workflow};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Invoked only on the `rollback` error-handling policy, with the
/// accumulated `StepResult`s (in workflow order) and the run's context.
/// The default implementation is a no-op.
#[async_trait]
pub trait RollbackHook: Send + Sync {
    async fn rollback(&self, step_results: &[StepResult], context: &ExecutionContext);
}

pub struct NoopRollbackHook;

#[async_trait]
impl RollbackHook for NoopRollbackHook {
    async fn rollback(&self, _step_results: &[StepResult], _context: &ExecutionContext) {}
}

/// Builds an [`Engine`] from its collaborators, all of which default to
/// something sensible: no agent adapter, no tool registry (either may be
/// supplied later), a default [`RetryPolicy`] and [`CircuitBreaker`], and a
/// no-op rollback hook.
pub struct EngineBuilder {
    agent_adapter: Option<Arc<dyn AgentAdapter>>,
    tool_registry: Option<Arc<dyn ToolRegistry>>,
    state_store: Arc<dyn StateStore>,
    execution_logger: Arc<dyn ExecutionLogger>,
    config: EngineConfig,
    retry_policy: RetryPolicy,
    circuit_breaker: Arc<CircuitBreaker>,
    rollback_hook: Arc<dyn RollbackHook>,
}

impl EngineBuilder {
    pub fn new(state_store: Arc<dyn StateStore>, execution_logger: Arc<dyn ExecutionLogger>) -> Self {
        Self {
            agent_adapter: None,
            tool_registry: None,
            state_store,
            execution_logger,
            config: EngineConfig::default(),
            retry_policy: RetryPolicy::default(),
            circuit_breaker: Arc::new(CircuitBreaker::default()),
            rollback_hook: Arc::new(NoopRollbackHook),
        }
    }

    pub fn agent_adapter(mut self, adapter: Arc<dyn AgentAdapter>) -> Self {
        self.agent_adapter = Some(adapter);
        self
    }

    pub fn tool_registry(mut self, registry: Arc<dyn ToolRegistry>) -> Self {
        self.tool_registry = Some(registry);
        self
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.retry_policy = config.retry.clone();
        self.circuit_breaker = Arc::new(CircuitBreaker::from(&config.circuit_breaker));
        self.config = config;
        self
    }

    pub fn rollback_hook(mut self, hook: Arc<dyn RollbackHook>) -> Self {
        self.rollback_hook = hook;
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            agent_adapter: self.agent_adapter,
            tool_registry: self.tool_registry,
            state_store: self.state_store,
            execution_logger: self.execution_logger,
            config: self.config,
            retry_policy: self.retry_policy,
            circuit_breaker: self.circuit_breaker,
            rollback_hook: self.rollback_hook,
            cancellations: Mutex::new(HashMap::new()),
        }
    }
}

pub struct Engine {
    agent_adapter: Option<Arc<dyn AgentAdapter>>,
    tool_registry: Option<Arc<dyn ToolRegistry>>,
    state_store: Arc<dyn StateStore>,
    execution_logger: Arc<dyn ExecutionLogger>,
    config: EngineConfig,
    retry_policy: RetryPolicy,
    circuit_breaker: Arc<CircuitBreaker>,
    rollback_hook: Arc<dyn RollbackHook>,
    /// One [`CancellationHandle`] per in-flight run, keyed by run id. The
    /// engine itself is reentrant (spec §5): concurrent calls to `execute`
    /// register and deregister their own entry, so cancelling or finishing
    /// one run never touches another's flag.
    cancellations: Mutex<HashMap<String, CancellationHandle>>,
}

impl Engine {
    /// Cancels the run identified by `run_id`, if it is currently in
    /// flight on this engine. Returns `false` if no such run is running
    /// (already finished, or never started here). The step loop only
    /// observes this between steps, never mid-step; in-flight adapter/tool
    /// calls are expected to race the same [`CancellationHandle`] themselves.
    pub fn cancel(&self, run_id: &str) -> bool {
        match self
            .cancellations
            .lock()
            .expect("cancellation registry lock poisoned")
            .get(run_id)
        {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }

    fn register_cancellation(&self, run_id: &str) -> CancellationHandle {
        let handle = CancellationHandle::new();
        self.cancellations
            .lock()
            .expect("cancellation registry lock poisoned")
            .insert(run_id.to_string(), handle.clone());
        handle
    }

    fn deregister_cancellation(&self, run_id: &str) {
        self.cancellations
            .lock()
            .expect("cancellation registry lock poisoned")
            .remove(run_id);
    }

    fn generate_run_id(workflow_id: &str) -> String {
        let timestamp = Utc::now().format("%Y%m%d-%H%M%S");
        let short_uuid = &Uuid::new_v4().simple().to_string()[..8];
        format!("{workflow_id}-{timestamp}-{short_uuid}")
    }

    #[instrument(skip(self, workflow, inputs), fields(workflow_id = %workflow.id))]
    pub async fn execute(
        &self,
        workflow: &Workflow,
        inputs: Option<HashMap<String, serde_json::Value>>,
        agent_override: Option<String>,
        resume_from: Option<String>,
    ) -> Result<WorkflowResult> {
        let inputs = inputs.unwrap_or_default();
        let started_at = Utc::now();

        if !self.circuit_breaker.can_execute() {
            warn!("circuit open, refusing execution");
            let run_id = resume_from.unwrap_or_else(|| Self::generate_run_id(&workflow.id));
            return Ok(WorkflowResult {
                run_id,
                workflow_id: workflow.id.clone(),
                agent_name: agent_override.unwrap_or_else(|| "unknown".to_string()),
                status: RunStatus::Failed,
                step_results: Vec::new(),
                final_output: HashMap::new(),
                error: Some("circuit open: too many recent failures".to_string()),
                started_at,
                completed_at: Utc::now(),
            });
        }

        // A resume is only genuine if the state store actually holds a
        // record for the given run_id (spec §4.1); an unknown or stale id
        // falls back to a fresh run exactly as if resume_from were None.
        let existing_record = match &resume_from {
            Some(run_id) => self.state_store.get_execution(run_id).await?,
            None => None,
        };

        let (run_id, start_step, is_resume) = match &existing_record {
            Some(record) => {
                let resume_point = self
                    .state_store
                    .get_resume_point(&record.run_id, workflow.steps.len())
                    .await?;
                (record.run_id.clone(), resume_point, true)
            }
            None => (Self::generate_run_id(&workflow.id), 0, false),
        };

        let agent_name = agent_override.unwrap_or_else(|| self.config.agent.primary.clone());
        let capabilities = AgentCapabilities {
            name: agent_name.clone(),
            version: "1.0.0".to_string(),
            provider: "unknown".to_string(),
            supports_tool_calling: true,
            supports_reasoning: true,
        };

        let cancellation = self.register_cancellation(&run_id);
        let mut context = ExecutionContext::new(
            run_id.clone(),
            workflow.id.clone(),
            agent_name.clone(),
            capabilities,
            inputs.clone(),
            self.config.clone(),
            cancellation,
        );

        // From here on, every return path must deregister the run's
        // cancellation handle; collaborator errors are caught and turned
        // into a failed WorkflowResult (with finalize still attempted)
        // rather than left to unwind past those paths via `?` (spec §4.1).

        if start_step > 0 {
            if let Err(err) = self.reload_variables(&run_id, workflow, &mut context).await {
                self.deregister_cancellation(&run_id);
                return Ok(self.immediate_failure(
                    run_id,
                    workflow,
                    agent_name,
                    started_at,
                    format!("failed to reload resume state: {err}"),
                ));
            }
        }

        if let Err(err) = self
            .execution_logger
            .start_log(
                &run_id,
                &workflow.id,
                &workflow.name,
                &agent_name,
                &serde_json::to_value(&inputs).unwrap_or(serde_json::Value::Null),
            )
            .await
        {
            self.deregister_cancellation(&run_id);
            return Ok(self.immediate_failure(
                run_id,
                workflow,
                agent_name,
                started_at,
                format!("execution logger error: {err}"),
            ));
        }

        if !is_resume {
            let record = ExecutionRecord::new(
                run_id.clone(),
                workflow.id.clone(),
                agent_name.clone(),
                workflow.steps.len(),
                inputs.clone(),
            );
            if let Err(err) = self.state_store.create_execution(record).await {
                self.deregister_cancellation(&run_id);
                return Ok(self.immediate_failure(
                    run_id,
                    workflow,
                    agent_name,
                    started_at,
                    format!("state store error: {err}"),
                ));
            }
        }

        if let Some(mut error_msg) = self.validate(workflow, &context) {
            if let Err(err) = self.finalize(&run_id, false, None, Some(&error_msg)).await {
                error_msg = format!("{error_msg}; additionally, finalize failed: {err}");
            }
            self.deregister_cancellation(&run_id);
            return Ok(WorkflowResult {
                run_id,
                workflow_id: workflow.id.clone(),
                agent_name,
                status: RunStatus::Failed,
                step_results: Vec::new(),
                final_output: HashMap::new(),
                error: Some(error_msg),
                started_at,
                completed_at: Utc::now(),
            });
        }

        let mut step_results = Vec::new();
        let mut final_status = RunStatus::Completed;
        let mut error_message: Option<String> = None;

        for (i, step) in workflow.steps.iter().enumerate() {
            if i < start_step {
                continue;
            }
            if context.cancellation.is_cancelled() {
                final_status = RunStatus::Failed;
                error_message = Some("cancelled".to_string());
                break;
            }

            context.current_step_index = i;
            if let Err(err) = self.execution_logger.step_started(&run_id, &step.name, i).await {
                final_status = RunStatus::Failed;
                error_message = Some(format!("execution logger error: {err}"));
                break;
            }

            if !condition::all_pass(
                &step
                    .conditions
                    .iter()
                    .map(|c| template::resolve_string(c, &context.template_context()))
                    .collect::<Vec<_>>(),
            ) {
                debug!(step = %step.name, "conditions failed, skipping step");
                step_results.push(StepResult::skipped(step.id.clone(), Utc::now()));
                continue;
            }

            let step_result = self.execute_step_with_retry(step, &mut context).await;
            step_results.push(step_result.clone());

            let checkpoint = StepCheckpoint {
                run_id: run_id.clone(),
                step_index: i,
                step_name: step.name.clone(),
                status: match step_result.status {
                    ResultStepStatus::Completed => StepStatus::Completed,
                    ResultStepStatus::Failed => StepStatus::Failed,
                    ResultStepStatus::Skipped => StepStatus::Skipped,
                },
                started_at: step_result.started_at,
                completed_at: Some(step_result.completed_at),
                outputs: step_result.output.clone().map(|output| {
                    HashMap::from([("output".to_string(), output)])
                }),
                error: step_result.error.clone(),
                retry_count: step_result.retries,
            };
            if let Err(err) = self.state_store.save_checkpoint(checkpoint).await {
                final_status = RunStatus::Failed;
                error_message = Some(format!("state store error: {err}"));
                break;
            }

            if step_result.status == ResultStepStatus::Completed {
                if let (Some(var_name), Some(output)) =
                    (&step.output_variable, step_result.output.clone())
                {
                    context.bind_output(var_name, output);
                }
            }

            let duration_ms = (step_result.completed_at - step_result.started_at)
                .num_milliseconds()
                .max(0) as u64;
            let logger_result = match step_result.status {
                ResultStepStatus::Completed => {
                    self.execution_logger
                        .step_completed(
                            &run_id,
                            &step.name,
                            i,
                            duration_ms,
                            step_result.output.as_ref().unwrap_or(&serde_json::Value::Null),
                        )
                        .await
                }
                ResultStepStatus::Failed => {
                    self.execution_logger
                        .step_failed(
                            &run_id,
                            &step.name,
                            i,
                            step_result.error.as_deref().unwrap_or("unknown error"),
                            duration_ms,
                        )
                        .await
                }
                ResultStepStatus::Skipped => Ok(()),
            };
            if let Err(err) = logger_result {
                final_status = RunStatus::Failed;
                error_message = Some(format!("execution logger error: {err}"));
                break;
            }

            if step_result.status == ResultStepStatus::Failed {
                match workflow.error_handling {
                    ErrorHandling::Continue => {}
                    ErrorHandling::Stop => {
                        final_status = RunStatus::Failed;
                        error_message = Some(format!(
                            "step '{}' failed: {}",
                            step.id,
                            step_result.error.as_deref().unwrap_or("unknown error")
                        ));
                        break;
                    }
                    ErrorHandling::Rollback => {
                        final_status = RunStatus::Failed;
                        error_message = Some(format!(
                            "step '{}' failed, rollback triggered",
                            step.id
                        ));
                        self.rollback_hook.rollback(&step_results, &context).await;
                        break;
                    }
                }
            }
        }

        if final_status == RunStatus::Completed {
            self.circuit_breaker.record_success();
        } else {
            self.circuit_breaker.record_failure();
        }

        let outputs = if final_status == RunStatus::Completed {
            Some(context.variables.clone())
        } else {
            None
        };
        // finalize's own state-store/logger errors are themselves
        // catastrophic-engine errors, so they are folded into the result
        // rather than propagated: the run already happened, and the caller
        // must still see the record/log flushed before return (or learn
        // that flushing it failed), never an unwound `execute()` call.
        if let Err(err) = self
            .finalize(&run_id, final_status == RunStatus::Completed, outputs.clone(), error_message.as_deref())
            .await
        {
            final_status = RunStatus::Failed;
            error_message = Some(match error_message {
                Some(prior) => format!("{prior}; additionally, finalize failed: {err}"),
                None => format!("finalize failed: {err}"),
            });
        }

        self.deregister_cancellation(&run_id);

        info!(run_id = %run_id, status = ?final_status, "run finished");
        Ok(WorkflowResult {
            run_id,
            workflow_id: workflow.id.clone(),
            agent_name,
            status: final_status,
            step_results,
            final_output: context.variables,
            error: error_message,
            started_at,
            completed_at: Utc::now(),
        })
    }

    /// Builds the `WorkflowResult` for a run that failed before the step
    /// loop could start (collaborator error during setup, or a rejected
    /// resume). No `ExecutionRecord`/log is assumed to exist yet, so there
    /// is nothing left to finalize.
    fn immediate_failure(
        &self,
        run_id: String,
        workflow: &Workflow,
        agent_name: String,
        started_at: chrono::DateTime<Utc>,
        error: String,
    ) -> WorkflowResult {
        warn!(run_id = %run_id, error = %error, "run failed before step loop started");
        WorkflowResult {
            run_id,
            workflow_id: workflow.id.clone(),
            agent_name,
            status: RunStatus::Failed,
            step_results: Vec::new(),
            final_output: HashMap::new(),
            error: Some(error),
            started_at,
            completed_at: Utc::now(),
        }
    }

    /// Reconstruct prior `output_variable` bindings from completed
    /// checkpoints below the resume point, so templates in steps >=
    /// resume point see the same variables an uninterrupted run would.
    async fn reload_variables(
        &self,
        run_id: &str,
        workflow: &Workflow,
        context: &mut ExecutionContext,
    ) -> Result<()> {
        let checkpoints = self.state_store.get_checkpoints(run_id).await?;
        let mut ordered = checkpoints;
        ordered.sort_by_key(|c| c.step_index);
        for checkpoint in ordered {
            if checkpoint.status != StepStatus::Completed {
                continue;
            }
            let Some(step) = workflow.steps.get(checkpoint.step_index) else {
                continue;
            };
            let Some(var_name) = &step.output_variable else {
                continue;
            };
            if let Some(output) = checkpoint.outputs.as_ref().and_then(|o| o.get("output")) {
                context.variables.insert(var_name.clone(), output.clone());
            }
        }
        Ok(())
    }

    fn validate(&self, workflow: &Workflow, context: &ExecutionContext) -> Option<String> {
        let mut errors = Vec::new();

        if let Some(registry) = &self.tool_registry {
            for tool_name in workflow.get_required_tools() {
                if !registry.has_tool(tool_name, &context.agent_name) {
                    errors.push(format!("required tool not available: {tool_name}"));
                }
            }
        }

        for param in &workflow.inputs {
            if param.required && !context.inputs.contains_key(&param.name) && param.default.is_none() {
                errors.push(format!("required input not provided: {}", param.name));
            }
        }

        if !workflow.is_compatible_with(&context.agent_name) {
            errors.push(format!(
                "workflow not compatible with agent: {}",
                context.agent_name
            ));
        }

        if errors.is_empty() {
            None
        } else {
            Some(format!("validation failed: {}", errors.join("; ")))
        }
    }

    async fn execute_step_with_retry(&self, step: &Step, context: &mut ExecutionContext) -> StepResult {
        let started_at = Utc::now();
        let max_retries = step.error_handling.max_retries.min(self.retry_policy.max_retries);
        let mut last_error: Option<String> = None;

        for attempt in 0..=max_retries {
            let resolved_inputs = template::resolve_inputs(&step.inputs, &context.inputs, &context.variables);

            match self.dispatch(step, &resolved_inputs, context).await {
                Ok(output) => {
                    return StepResult {
                        step_id: step.id.clone(),
                        status: ResultStepStatus::Completed,
                        output: Some(output),
                        error: None,
                        started_at,
                        completed_at: Utc::now(),
                        retries: attempt,
                    };
                }
                Err(err) => {
                    last_error = Some(err.to_string());
                    if attempt < max_retries {
                        let delay = self.retry_policy.get_delay(attempt + 1);
                        let _ = self
                            .execution_logger
                            .step_retrying(
                                &context.run_id,
                                &step.name,
                                context.current_step_index,
                                attempt + 1,
                                max_retries,
                                delay,
                            )
                            .await;
                        tokio::time::sleep(self.retry_policy.delay_duration(attempt + 1)).await;
                    }
                }
            }
        }

        StepResult {
            step_id: step.id.clone(),
            status: ResultStepStatus::Failed,
            output: None,
            error: last_error,
            started_at,
            completed_at: Utc::now(),
            retries: max_retries,
        }
    }

    async fn dispatch(
        &self,
        step: &Step,
        resolved_inputs: &HashMap<String, serde_json::Value>,
        context: &ExecutionContext,
    ) -> anyhow::Result<serde_json::Value> {
        if let Some((kind, operation)) = step.parse_action() {
            if kind == "agent" {
                let adapter = self
                    .agent_adapter
                    .as_ref()
                    .ok_or(EngineError::NoAgentAdapter)?;

                let hints = step
                    .hints
                    .get(&context.agent_name)
                    .and_then(|v| v.as_object())
                    .map(|hints| {
                        hints
                            .iter()
                            .map(|(k, v)| (k.clone(), v.clone()))
                            .collect::<HashMap<_, _>>()
                    })
                    .unwrap_or_default();

                let mut task_inputs = resolved_inputs.clone();
                task_inputs.extend(hints);

                return adapter.execute_step(step, &task_inputs, context).await;
            }

            let registry = self
                .tool_registry
                .as_ref()
                .ok_or(EngineError::NoToolRegistry)?;
            let tool = registry
                .get_tool(kind, &context.agent_name)
                .ok_or_else(|| EngineError::ToolNotFound(kind.to_string()))?;
            return tool.execute(operation, resolved_inputs).await;
        }

        Err(EngineError::MalformedAction(step.action.clone()).into())
    }

    async fn finalize(
        &self,
        run_id: &str,
        success: bool,
        outputs: Option<HashMap<String, serde_json::Value>>,
        error: Option<&str>,
    ) -> Result<()> {
        if let Some(mut record) = self.state_store.get_execution(run_id).await? {
            record.status = if success {
                ExecutionStatus::Completed
            } else {
                ExecutionStatus::Failed
            };
            record.completed_at = Some(Utc::now());
            record.outputs = outputs.clone();
            record.error = error.map(str::to_string);
            self.state_store.update_execution(record).await?;
        }

        self.execution_logger
            .finish_log(
                run_id,
                success,
                &serde_json::to_value(&outputs.unwrap_or_default()).unwrap_or(serde_json::Value::Null),
                error,
            )
            .await?;
        Ok(())
    }
}
