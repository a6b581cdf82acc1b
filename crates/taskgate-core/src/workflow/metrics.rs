use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::run::{RunStatus, StepStatus, WorkflowRun};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StepMetric {
    pub duration_ms: u64,
    pub retry_count: u32,
}

/// Aggregate figures computed once a run finishes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunMetrics {
    pub successful_steps: usize,
    pub failed_steps: usize,
    pub total_duration_ms: u64,
    pub peak_memory_bytes: u64,
    pub steps: BTreeMap<String, StepMetric>,
}

impl RunMetrics {
    pub fn from_run(run: &WorkflowRun, peak_memory_bytes: u64) -> Self {
        let mut metrics = Self {
            total_duration_ms: run.duration_ms(),
            peak_memory_bytes,
            ..Default::default()
        };
        for (id, step) in &run.step_results {
            match step.status {
                StepStatus::Completed => metrics.successful_steps += 1,
                StepStatus::Failed => metrics.failed_steps += 1,
            }
            metrics.steps.insert(
                id.clone(),
                StepMetric {
                    duration_ms: step.duration_ms,
                    retry_count: step.retry_count,
                },
            );
        }
        metrics
    }
}

/// Rolling, process-wide counters across every run of one engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    pub total_runs: u64,
    pub succeeded_runs: u64,
    pub failed_runs: u64,
    pub average_run_duration_ms: f64,
}

impl SystemMetrics {
    pub fn record(&mut self, status: RunStatus, duration_ms: u64) {
        self.total_runs += 1;
        match status {
            RunStatus::Completed => self.succeeded_runs += 1,
            RunStatus::Failed => self.failed_runs += 1,
            RunStatus::Running => {}
        }
        let n = self.total_runs as f64;
        self.average_run_duration_ms += (duration_ms as f64 - self.average_run_duration_ms) / n;
    }
}
