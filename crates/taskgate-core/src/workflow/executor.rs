//! Workflow Engine: runs a workflow definition as a dependency graph.
//!
//! The engine:
//! 1. Validates the definition (ids, tool ids, dependencies, cycles)
//! 2. Repeatedly computes the ready set: steps whose dependencies all completed
//! 3. Dispatches up to `concurrencyLimit` ready steps at once
//! 4. Retries failed tool invocations with a linearly growing delay
//! 5. Publishes a run snapshot after every step and records metrics at the end
//!
//! A run is owned by the task driving it; everything else only ever sees
//! cloned snapshots.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::RwLock;
use tokio::task::JoinSet;

use crate::config::EngineConfig;
use crate::error::{ErrorBody, GatewayError};
use crate::tools::ToolInvoker;
use crate::workflow::memory::{MemoryProbe, ProcessMemoryProbe};
use crate::workflow::metrics::{RunMetrics, SystemMetrics};
use crate::workflow::run::{RunStatus, StepResult, StepStatus, WorkflowRun};
use crate::workflow::schema::{StepPolicy, WorkflowDefinition, WorkflowStep};

pub struct WorkflowEngine {
    config: EngineConfig,
    tools: Arc<dyn ToolInvoker>,
    memory: Arc<dyn MemoryProbe>,
    catalog: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    runs: RwLock<HashMap<String, WorkflowRun>>,
    system_metrics: Mutex<SystemMetrics>,
}

impl WorkflowEngine {
    pub fn new(config: EngineConfig, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            config,
            tools,
            memory: Arc::new(ProcessMemoryProbe::new()),
            catalog: RwLock::new(HashMap::new()),
            runs: RwLock::new(HashMap::new()),
            system_metrics: Mutex::new(SystemMetrics::default()),
        }
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory = probe;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ─── Catalog ──────────────────────────────────────────────────────────

    /// Validate and store a definition; an existing id is replaced.
    pub async fn register(&self, definition: WorkflowDefinition) -> Result<(), GatewayError> {
        definition.validate()?;
        tracing::info!(
            "[Engine] Registered workflow '{}' ({} steps)",
            definition.id,
            definition.steps.len()
        );
        self.catalog
            .write()
            .await
            .insert(definition.id.clone(), Arc::new(definition));
        Ok(())
    }

    pub async fn definition(&self, workflow_id: &str) -> Option<Arc<WorkflowDefinition>> {
        self.catalog.read().await.get(workflow_id).cloned()
    }

    pub async fn list_definitions(&self) -> Vec<Arc<WorkflowDefinition>> {
        let mut defs: Vec<_> = self.catalog.read().await.values().cloned().collect();
        defs.sort_by(|a, b| a.id.cmp(&b.id));
        defs
    }

    // ─── Runs ─────────────────────────────────────────────────────────────

    pub async fn run_snapshot(&self, run_id: &str) -> Option<WorkflowRun> {
        self.runs.read().await.get(run_id).cloned()
    }

    /// Ids of every run still held (running or archived).
    pub async fn run_ids(&self) -> HashSet<String> {
        self.runs.read().await.keys().cloned().collect()
    }

    pub async fn list_runs(&self, workflow_id: Option<&str>) -> Vec<WorkflowRun> {
        let runs = self.runs.read().await;
        let mut list: Vec<WorkflowRun> = runs
            .values()
            .filter(|r| workflow_id.map_or(true, |id| r.workflow_id == id))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        list
    }

    pub fn system_metrics(&self) -> SystemMetrics {
        self.system_metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Execute a definition to completion and return the final run.
    ///
    /// Only structural problems are returned as `Err`; step failures end up
    /// in the run's status and `error`.
    pub async fn execute(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowRun, GatewayError> {
        definition.validate()?;
        let run = WorkflowRun::new(uuid::Uuid::new_v4().to_string(), definition.id.clone());
        self.claim(&run).await?;
        Ok(self.drive(Arc::new(definition.clone()), run).await)
    }

    /// Start a registered workflow in the background and return its initial snapshot.
    pub async fn start(
        self: &Arc<Self>,
        workflow_id: &str,
        run_id: Option<String>,
    ) -> Result<WorkflowRun, GatewayError> {
        let definition = self
            .definition(workflow_id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("Workflow {} not found", workflow_id)))?;

        let run_id = run_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let run = WorkflowRun::new(run_id, definition.id.clone());
        self.claim(&run).await?;

        let engine = Arc::clone(self);
        let initial = run.clone();
        tokio::spawn(async move {
            engine.drive(definition, run).await;
        });
        Ok(initial)
    }

    /// Record a new run. The id check and the insert share one write guard,
    /// so exactly one caller ever drives a given run id.
    async fn claim(&self, run: &WorkflowRun) -> Result<(), GatewayError> {
        let mut runs = self.runs.write().await;
        match runs.entry(run.run_id.clone()) {
            Entry::Occupied(_) => {
                return Err(GatewayError::Conflict(format!(
                    "Run {} already exists",
                    run.run_id
                )))
            }
            Entry::Vacant(slot) => {
                slot.insert(run.clone());
            }
        }
        self.evict_archived(&mut runs);
        Ok(())
    }

    async fn publish(&self, run: &WorkflowRun) {
        let mut runs = self.runs.write().await;
        runs.insert(run.run_id.clone(), run.clone());
        self.evict_archived(&mut runs);
    }

    /// Drop the oldest finished runs beyond the archive limit.
    fn evict_archived(&self, runs: &mut HashMap<String, WorkflowRun>) {
        let limit = self.config.run_archive_limit;
        if runs.len() <= limit {
            return;
        }
        let mut finished: Vec<(String, chrono::DateTime<Utc>)> = runs
            .values()
            .filter(|r| r.is_finished())
            .map(|r| (r.run_id.clone(), r.ended_at.unwrap_or(r.started_at)))
            .collect();
        finished.sort_by(|a, b| a.1.cmp(&b.1));
        let excess = runs.len() - limit;
        for (id, _) in finished.into_iter().take(excess) {
            tracing::debug!("[Engine] Evicting archived run {}", id);
            runs.remove(&id);
        }
    }

    /// The scheduling loop. Single writer for `run`.
    async fn drive(&self, definition: Arc<WorkflowDefinition>, mut run: WorkflowRun) -> WorkflowRun {
        tracing::info!(
            "[Engine] Run {} started for workflow '{}' ({} steps, concurrency {})",
            run.run_id,
            definition.id,
            definition.steps.len(),
            definition.concurrency_limit
        );

        let mut join_set: JoinSet<StepResult> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut halted = false;
        let mut peak_memory = self.memory.snapshot();

        loop {
            if !halted {
                let capacity = definition.concurrency_limit.saturating_sub(in_flight.len());
                let ready: Vec<WorkflowStep> = ready_steps(&definition, &run, &in_flight)
                    .into_iter()
                    .take(capacity)
                    .cloned()
                    .collect();

                for step in ready {
                    tracing::debug!("[Engine] Run {} dispatching step '{}'", run.run_id, step.id);
                    in_flight.insert(step.id.clone());
                    run.execution_order.push(step.id.clone());

                    let policy = step.policy(&self.config);
                    let tools = Arc::clone(&self.tools);
                    let memory = Arc::clone(&self.memory);
                    let slow_threshold_ms = self.config.slow_step_threshold_ms;
                    join_set.spawn(async move {
                        run_step(step, policy, tools, memory, slow_threshold_ms).await
                    });
                }
            }

            if join_set.is_empty() {
                break;
            }

            let result = match join_set.join_next().await {
                Some(Ok(result)) => result,
                Some(Err(e)) => {
                    tracing::error!("[Engine] Run {} lost a step task: {}", run.run_id, e);
                    halted = true;
                    continue;
                }
                None => break,
            };

            peak_memory = peak_memory.max(self.memory.snapshot());
            in_flight.remove(&result.step_id);

            let required = definition
                .step(&result.step_id)
                .map(|s| s.required)
                .unwrap_or(true);

            if result.status == StepStatus::Failed {
                if required {
                    tracing::warn!(
                        "[Engine] Run {} required step '{}' failed",
                        run.run_id,
                        result.step_id
                    );
                    if run.error.is_none() {
                        run.error = result.error.clone();
                    }
                    if definition.halt_on_failure {
                        halted = true;
                    }
                } else {
                    tracing::info!(
                        "[Engine] Run {} optional step '{}' failed, continuing",
                        run.run_id,
                        result.step_id
                    );
                }
            }

            run.step_results.insert(result.step_id.clone(), result);
            self.publish(&run).await;
        }

        self.finalize(&definition, &mut run, &in_flight, halted);
        run.metrics = Some(RunMetrics::from_run(&run, peak_memory));

        if let Ok(mut metrics) = self.system_metrics.lock() {
            metrics.record(run.status, run.duration_ms());
        }
        self.publish(&run).await;

        tracing::info!(
            "[Engine] Run {} {} in {}ms ({} steps)",
            run.run_id,
            run.status.as_str(),
            run.duration_ms(),
            run.step_results.len()
        );
        run
    }

    /// Give every unresolved step a terminal result and settle the run status.
    fn finalize(
        &self,
        definition: &WorkflowDefinition,
        run: &mut WorkflowRun,
        lost: &HashSet<String>,
        halted: bool,
    ) {
        let unresolved: Vec<&WorkflowStep> = definition
            .steps
            .iter()
            .filter(|s| !run.step_results.contains_key(&s.id))
            .collect();

        let mut first_blocker: Option<ErrorBody> = None;
        let mut placeholders = Vec::with_capacity(unresolved.len());

        for step in unresolved {
            let error = if let Some(dependency) = failed_ancestor(definition, run, &step.id) {
                GatewayError::BlockedByFailedDependency {
                    step_id: step.id.clone(),
                    dependency,
                }
                .to_body()
            } else if lost.contains(&step.id) {
                GatewayError::Internal(format!("Step '{}' task ended without a result", step.id))
                    .to_body()
            } else if halted {
                ErrorBody::new(
                    "RUN_HALTED",
                    format!("Step '{}' not started: run halted after a required step failed", step.id),
                )
            } else {
                // Unreachable once validation has ruled out cycles and unknown deps.
                tracing::error!(
                    "[Engine] Run {} stalled with step '{}' unresolved",
                    run.run_id,
                    step.id
                );
                GatewayError::WorkflowStalled(format!(
                    "No ready steps but '{}' has no result",
                    step.id
                ))
                .to_body()
            };

            if first_blocker.is_none() && error.code != "RUN_HALTED" {
                first_blocker = Some(error.clone());
            }
            placeholders.push(StepResult::not_run(&step.id, error));
        }

        for result in placeholders {
            run.step_results.insert(result.step_id.clone(), result);
        }

        if run.error.is_none() {
            run.error = first_blocker;
        }

        let required_failed = run.step_results.values().any(|r| {
            r.status == StepStatus::Failed
                && definition.step(&r.step_id).map(|s| s.required).unwrap_or(true)
        });

        run.status = if run.error.is_none() && !required_failed {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        run.ended_at = Some(Utc::now());
    }
}

/// Steps without a result, not in flight, whose dependencies all completed.
fn ready_steps<'a>(
    definition: &'a WorkflowDefinition,
    run: &WorkflowRun,
    in_flight: &HashSet<String>,
) -> Vec<&'a WorkflowStep> {
    definition
        .steps
        .iter()
        .filter(|s| !run.step_results.contains_key(&s.id) && !in_flight.contains(&s.id))
        .filter(|s| {
            s.dependencies.iter().all(|dep| {
                run.step_results
                    .get(dep)
                    .map(|r| r.is_completed())
                    .unwrap_or(false)
            })
        })
        .collect()
}

/// First failed step found walking `step_id`'s dependencies breadth-first.
fn failed_ancestor(
    definition: &WorkflowDefinition,
    run: &WorkflowRun,
    step_id: &str,
) -> Option<String> {
    let mut queue: VecDeque<&str> = VecDeque::new();
    let mut seen: HashSet<&str> = HashSet::new();
    if let Some(step) = definition.step(step_id) {
        queue.extend(step.dependencies.iter().map(|d| d.as_str()));
    }

    while let Some(current) = queue.pop_front() {
        if !seen.insert(current) {
            continue;
        }
        if let Some(result) = run.step_results.get(current) {
            if result.status == StepStatus::Failed && result.attempts > 0 {
                return Some(current.to_string());
            }
        }
        if let Some(step) = definition.step(current) {
            queue.extend(step.dependencies.iter().map(|d| d.as_str()));
        }
    }
    None
}

/// Execute one step with retries. Never panics; failures become a failed result.
async fn run_step(
    step: WorkflowStep,
    policy: StepPolicy,
    tools: Arc<dyn ToolInvoker>,
    memory: Arc<dyn MemoryProbe>,
    slow_threshold_ms: u64,
) -> StepResult {
    let started_at = Utc::now();
    let clock = tokio::time::Instant::now();
    let memory_before = memory.snapshot();

    let mut attempts: u32 = 0;
    let mut outcome: Result<serde_json::Value, String> = Err(String::new());

    for attempt in 0..=policy.max_retries {
        attempts = attempt + 1;
        outcome = invoke_once(&step, &policy, Arc::clone(&tools)).await;

        match &outcome {
            Ok(_) => break,
            Err(message) => {
                tracing::warn!(
                    "[Engine] Step '{}' attempt {}/{} failed: {}",
                    step.id,
                    attempts,
                    policy.max_retries + 1,
                    message
                );
                if attempt < policy.max_retries {
                    let delay = policy.retry_delay_ms.saturating_mul(u64::from(attempt) + 1);
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    let duration_ms = clock.elapsed().as_millis() as u64;
    let memory_delta_bytes = memory.snapshot() as i64 - memory_before as i64;

    let mut warnings = Vec::new();
    if duration_ms > slow_threshold_ms {
        tracing::warn!(
            "[Engine] Step '{}' took {}ms (threshold {}ms)",
            step.id,
            duration_ms,
            slow_threshold_ms
        );
        warnings.push(format!(
            "Step took {}ms, exceeding the {}ms threshold",
            duration_ms, slow_threshold_ms
        ));
    }

    let (status, result, error) = match outcome {
        Ok(value) => (StepStatus::Completed, Some(value), None),
        Err(message) => (
            StepStatus::Failed,
            None,
            Some(
                GatewayError::StepExecution {
                    step_id: step.id.clone(),
                    message,
                }
                .to_body(),
            ),
        ),
    };

    StepResult {
        step_id: step.id,
        status,
        result,
        error,
        started_at: Some(started_at),
        finished_at: Utc::now(),
        duration_ms,
        attempts,
        retry_count: attempts.saturating_sub(1),
        memory_delta_bytes,
        warnings,
    }
}

/// One tool invocation under the step deadline.
///
/// The call runs in its own task so that a deadline miss aborts it instead of
/// leaving it running in the background.
async fn invoke_once(
    step: &WorkflowStep,
    policy: &StepPolicy,
    tools: Arc<dyn ToolInvoker>,
) -> Result<serde_json::Value, String> {
    let tool_id = step.tool_id.clone();
    let params = step.params.clone();
    let mut handle = tokio::spawn(async move { tools.execute(&tool_id, &params).await });

    match tokio::time::timeout(Duration::from_millis(policy.timeout_ms), &mut handle).await {
        Ok(Ok(Ok(value))) => Ok(value),
        Ok(Ok(Err(e))) => Err(format!("{}: {}", e.code(), e)),
        Ok(Err(e)) => Err(format!("tool invocation aborted: {}", e)),
        Err(_) => {
            handle.abort();
            Err(format!("timed out after {}ms", policy.timeout_ms))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolError;
    use crate::workflow::memory::NoopMemoryProbe;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records every invocation; behaviour per tool id is scripted.
    #[derive(Default)]
    struct ScriptedTools {
        calls: Mutex<Vec<(String, tokio::time::Instant)>>,
        fail_first: Mutex<HashMap<String, usize>>,
        always_fail: HashSet<String>,
        sleep_ms: HashMap<String, u64>,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl ScriptedTools {
        fn calls_for(&self, tool_id: &str) -> Vec<tokio::time::Instant> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|(id, _)| id == tool_id)
                .map(|(_, at)| *at)
                .collect()
        }

        fn call_order(&self) -> Vec<String> {
            self.calls.lock().unwrap().iter().map(|(id, _)| id.clone()).collect()
        }

        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ToolInvoker for ScriptedTools {
        async fn execute(
            &self,
            tool_id: &str,
            params: &serde_json::Value,
        ) -> Result<serde_json::Value, ToolError> {
            self.calls
                .lock()
                .unwrap()
                .push((tool_id.to_string(), tokio::time::Instant::now()));

            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            if let Some(ms) = self.sleep_ms.get(tool_id) {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
            }
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.always_fail.contains(tool_id) {
                return Err(ToolError::Failed(format!("{} is down", tool_id)));
            }
            let mut fail_first = self.fail_first.lock().unwrap();
            if let Some(remaining) = fail_first.get_mut(tool_id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ToolError::Failed("transient".into()));
                }
            }
            Ok(serde_json::json!({ "tool": tool_id, "params": params }))
        }
    }

    fn fast_config() -> EngineConfig {
        EngineConfig {
            default_max_retries: 0,
            default_retry_delay_ms: 10,
            default_timeout_ms: 1000,
            slow_step_threshold_ms: 5000,
            run_archive_limit: 1000,
        }
    }

    fn engine(tools: Arc<ScriptedTools>) -> WorkflowEngine {
        WorkflowEngine::new(fast_config(), tools).with_memory_probe(Arc::new(NoopMemoryProbe))
    }

    fn wf(value: serde_json::Value) -> WorkflowDefinition {
        WorkflowDefinition::from_json(value).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_then_transform() {
        let tools = Arc::new(ScriptedTools::default());
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "etl",
            "concurrencyLimit": 1,
            "steps": [
                { "id": "transform", "toolId": "t2", "deps": ["fetch"] },
                { "id": "fetch", "toolId": "t1", "deps": [] }
            ]
        }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.execution_order, vec!["fetch", "transform"]);
        assert_eq!(tools.call_order(), vec!["t1", "t2"]);
        assert!(run.error.is_none());

        let metrics = run.metrics.unwrap();
        assert_eq!(metrics.successful_steps, 2);
        assert_eq!(metrics.failed_steps, 0);
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_any_call() {
        let tools = Arc::new(ScriptedTools::default());
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "loop",
            "steps": [
                { "id": "A", "toolId": "t", "deps": ["B"] },
                { "id": "B", "toolId": "t", "deps": ["A"] }
            ]
        }));

        let err = engine.execute(&def).await.unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert_eq!(tools.total_calls(), 0);
        assert_eq!(engine.system_metrics().total_runs, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhaust_with_growing_delay() {
        let tools = Arc::new(ScriptedTools {
            always_fail: ["flaky".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "retry",
            "steps": [
                { "id": "s", "toolId": "flaky", "maxRetries": 3, "retryDelayMs": 100 }
            ]
        }));

        let run = engine.execute(&def).await.unwrap();
        let step = &run.step_results["s"];
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.attempts, 4);
        assert_eq!(step.retry_count, 3);
        assert_eq!(step.error.as_ref().unwrap().code, "STEP_EXECUTION_ERROR");
        assert_eq!(run.status, RunStatus::Failed);

        let calls = tools.calls_for("flaky");
        assert_eq!(calls.len(), 4);
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps.windows(2).all(|g| g[1] > g[0]), "gaps: {:?}", gaps);
        assert!(gaps[0] >= Duration::from_millis(100));
        assert!(gaps[2] >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers() {
        let tools = Arc::new(ScriptedTools::default());
        tools.fail_first.lock().unwrap().insert("t".into(), 2);
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "recover",
            "steps": [{ "id": "s", "toolId": "t", "maxRetries": 2 }]
        }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results["s"].retry_count, 2);
        assert_eq!(run.metrics.unwrap().steps["s"].retry_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failed_attempt() {
        let tools = Arc::new(ScriptedTools {
            sleep_ms: [("slow".to_string(), 10_000)].into_iter().collect(),
            ..Default::default()
        });
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "deadline",
            "steps": [{ "id": "s", "toolId": "slow", "timeoutMs": 50, "maxRetries": 1 }]
        }));

        let run = engine.execute(&def).await.unwrap();
        let step = &run.step_results["s"];
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.attempts, 2);
        assert!(step.error.as_ref().unwrap().message.contains("timed out after 50ms"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_limit_respected() {
        let sleeps: HashMap<String, u64> = (0..6).map(|i| (format!("t{}", i), 100)).collect();
        let tools = Arc::new(ScriptedTools {
            sleep_ms: sleeps,
            ..Default::default()
        });
        let engine = engine(tools.clone());
        let steps: Vec<serde_json::Value> = (0..6)
            .map(|i| serde_json::json!({ "id": format!("s{}", i), "toolId": format!("t{}", i) }))
            .collect();
        let def = wf(serde_json::json!({ "id": "fan", "concurrencyLimit": 2, "steps": steps }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(tools.max_running.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dependency_never_starts_before_completion() {
        let sleeps: HashMap<String, u64> = [("a", 30), ("b", 5), ("c", 20), ("d", 1)]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        let tools = Arc::new(ScriptedTools {
            sleep_ms: sleeps,
            ..Default::default()
        });
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "diamond",
            "concurrencyLimit": 4,
            "steps": [
                { "id": "a", "toolId": "a" },
                { "id": "b", "toolId": "b", "deps": ["a"] },
                { "id": "c", "toolId": "c", "deps": ["a"] },
                { "id": "d", "toolId": "d", "deps": ["b", "c"] }
            ]
        }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        for step in &def.steps {
            let started = run.step_results[&step.id].started_at.unwrap();
            for dep in &step.dependencies {
                assert!(started >= run.step_results[dep].finished_at);
            }
        }
        assert_eq!(run.execution_order.first().unwrap(), "a");
        assert_eq!(run.execution_order.last().unwrap(), "d");
    }

    #[tokio::test]
    async fn test_required_failure_halts_and_blocks_dependents() {
        let tools = Arc::new(ScriptedTools {
            always_fail: ["bad".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "halt",
            "steps": [
                { "id": "first", "toolId": "bad" },
                { "id": "second", "toolId": "ok", "deps": ["first"] },
                { "id": "other", "toolId": "ok" }
            ]
        }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.step_results.len(), 3);
        assert!(run
            .step_results
            .values()
            .all(|r| matches!(r.status, StepStatus::Completed | StepStatus::Failed)));
        assert_eq!(
            run.step_results["second"].error.as_ref().unwrap().code,
            "BLOCKED_BY_FAILED_DEPENDENCY"
        );
        assert_eq!(run.error.as_ref().unwrap().code, "STEP_EXECUTION_ERROR");
    }

    #[tokio::test]
    async fn test_optional_failure_does_not_fail_run() {
        let tools = Arc::new(ScriptedTools {
            always_fail: ["sms".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "soft",
            "steps": [
                { "id": "charge", "toolId": "pay" },
                { "id": "notify", "toolId": "sms", "deps": ["charge"], "required": false },
                { "id": "ledger", "toolId": "book", "deps": ["charge"] }
            ]
        }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results["notify"].status, StepStatus::Failed);
        assert_eq!(run.step_results["ledger"].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_dependent_of_failed_optional_step_is_blocked() {
        let tools = Arc::new(ScriptedTools {
            always_fail: ["sms".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let engine = engine(tools);
        let def = wf(serde_json::json!({
            "id": "blocked",
            "steps": [
                { "id": "notify", "toolId": "sms", "required": false },
                { "id": "audit", "toolId": "log", "deps": ["notify"] }
            ]
        }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        let err = run.error.unwrap();
        assert_eq!(err.code, "BLOCKED_BY_FAILED_DEPENDENCY");
        assert!(err.message.contains("'notify'"));
    }

    #[tokio::test]
    async fn test_no_halt_keeps_independent_branches_running() {
        let tools = Arc::new(ScriptedTools {
            always_fail: ["bad".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let engine = engine(tools.clone());
        let def = wf(serde_json::json!({
            "id": "keep-going",
            "haltOnFailure": false,
            "steps": [
                { "id": "first", "toolId": "bad" },
                { "id": "other", "toolId": "ok" },
                { "id": "after-other", "toolId": "ok", "deps": ["other"] }
            ]
        }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.step_results["after-other"].status, StepStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_step_gets_warning_only() {
        let tools = Arc::new(ScriptedTools {
            sleep_ms: [("slow".to_string(), 200)].into_iter().collect(),
            ..Default::default()
        });
        let engine = WorkflowEngine::new(
            EngineConfig {
                slow_step_threshold_ms: 100,
                ..fast_config()
            },
            tools,
        )
        .with_memory_probe(Arc::new(NoopMemoryProbe));
        let def = wf(serde_json::json!({ "id": "w", "steps": [{ "id": "s", "toolId": "slow" }] }));

        let run = engine.execute(&def).await.unwrap();
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.step_results["s"].warnings.len(), 1);
    }

    #[tokio::test]
    async fn test_start_registered_workflow_and_poll() {
        let tools = Arc::new(ScriptedTools::default());
        let engine = Arc::new(engine(tools));
        engine
            .register(wf(serde_json::json!({
                "id": "bg",
                "steps": [{ "id": "s", "toolId": "t" }]
            })))
            .await
            .unwrap();

        let initial = engine.start("bg", Some("run-1".into())).await.unwrap();
        assert_eq!(initial.status, RunStatus::Running);

        let mut snapshot = engine.run_snapshot("run-1").await.unwrap();
        for _ in 0..100 {
            if snapshot.is_finished() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            snapshot = engine.run_snapshot("run-1").await.unwrap();
        }
        assert_eq!(snapshot.status, RunStatus::Completed);
        assert_eq!(engine.system_metrics().succeeded_runs, 1);

        let dup = engine.start("bg", Some("run-1".into())).await.unwrap_err();
        assert_eq!(dup.code(), "CONFLICT");
        assert_eq!(engine.start("nope", None).await.unwrap_err().code(), "NOT_FOUND");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_with_one_run_id_admit_one() {
        let tools = Arc::new(ScriptedTools::default());
        let engine = Arc::new(engine(tools));
        engine
            .register(wf(serde_json::json!({
                "id": "bg",
                "steps": [{ "id": "s", "toolId": "t" }]
            })))
            .await
            .unwrap();

        let rounds = 200;
        for i in 0..rounds {
            let run_id = format!("race-{}", i);
            let (a, b) = tokio::join!(
                tokio::spawn({
                    let engine = Arc::clone(&engine);
                    let run_id = run_id.clone();
                    async move { engine.start("bg", Some(run_id)).await }
                }),
                tokio::spawn({
                    let engine = Arc::clone(&engine);
                    let run_id = run_id.clone();
                    async move { engine.start("bg", Some(run_id)).await }
                })
            );
            let accepted = [a.unwrap(), b.unwrap()]
                .into_iter()
                .filter(|r| r.is_ok())
                .count();
            assert_eq!(accepted, 1, "run {} admitted {} starts", run_id, accepted);
        }

        for _ in 0..200 {
            if engine.list_runs(Some("bg")).await.iter().all(|r| r.is_finished()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(engine.list_runs(Some("bg")).await.len(), rounds);
        assert_eq!(engine.system_metrics().total_runs, rounds as u64);
    }

    #[tokio::test]
    async fn test_archive_keeps_only_recent_finished_runs() {
        let tools = Arc::new(ScriptedTools::default());
        let config = EngineConfig {
            run_archive_limit: 2,
            ..fast_config()
        };
        let engine = WorkflowEngine::new(config, tools).with_memory_probe(Arc::new(NoopMemoryProbe));
        let def = wf(serde_json::json!({ "id": "ok", "steps": [{ "id": "s", "toolId": "t" }] }));

        let first = engine.execute(&def).await.unwrap();
        engine.execute(&def).await.unwrap();
        engine.execute(&def).await.unwrap();

        assert_eq!(engine.run_ids().await.len(), 2);
        assert!(engine.run_snapshot(&first.run_id).await.is_none());
    }

    #[tokio::test]
    async fn test_system_metrics_roll_up() {
        let tools = Arc::new(ScriptedTools {
            always_fail: ["bad".to_string()].into_iter().collect(),
            ..Default::default()
        });
        let engine = engine(tools);
        let ok = wf(serde_json::json!({ "id": "ok", "steps": [{ "id": "s", "toolId": "t" }] }));
        let bad = wf(serde_json::json!({ "id": "bad", "steps": [{ "id": "s", "toolId": "bad" }] }));

        engine.execute(&ok).await.unwrap();
        engine.execute(&bad).await.unwrap();
        engine.execute(&ok).await.unwrap();

        let m = engine.system_metrics();
        assert_eq!(m.total_runs, 3);
        assert_eq!(m.succeeded_runs, 2);
        assert_eq!(m.failed_runs, 1);
        assert_eq!(engine.list_runs(Some("ok")).await.len(), 2);
    }
}
