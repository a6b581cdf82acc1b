//! Schema types for workflow definitions.
//!
//! A workflow is a DAG of steps, each bound to one tool invocation:
//!
//! ```yaml
//! id: "onboard-merchant"
//! concurrencyLimit: 2
//! haltOnFailure: true
//! steps:
//!   - id: "fetch"
//!     toolId: "crm.lookup"
//!     params: { merchant: "acme" }
//!
//!   - id: "charge"
//!     toolId: "payments.charge"
//!     dependencies: ["fetch"]
//!     maxRetries: 5
//!
//!   - id: "notify"
//!     toolId: "sms.send"
//!     dependencies: ["charge"]
//!     required: false
//! ```

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::error::GatewayError;

/// Top-level workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Workflow id, unique within an engine's catalog
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub description: Option<String>,

    /// Steps; order is informational only, dependencies drive scheduling
    #[serde(default)]
    pub steps: Vec<WorkflowStep>,

    /// Maximum number of steps running at once (default 1: sequential)
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Stop dispatching new steps once a required step has failed
    #[serde(default = "default_true")]
    pub halt_on_failure: bool,
}

fn default_concurrency_limit() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// A single node in the workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Step id (unique within the workflow)
    #[serde(default)]
    pub id: String,

    /// Tool invoked by this step
    #[serde(default)]
    pub tool_id: String,

    /// Parameter bag handed to the tool as-is
    #[serde(default)]
    pub params: serde_json::Value,

    /// Step ids that must complete before this step starts
    #[serde(default, alias = "deps")]
    pub dependencies: Vec<String>,

    /// A failed required step fails the run; optional failures are tolerated
    #[serde(default = "default_true")]
    pub required: bool,

    #[serde(default)]
    pub max_retries: Option<u32>,

    #[serde(default)]
    pub retry_delay_ms: Option<u64>,

    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Retry/timeout settings for one step after applying engine defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl WorkflowStep {
    pub fn policy(&self, defaults: &EngineConfig) -> StepPolicy {
        StepPolicy {
            max_retries: self.max_retries.unwrap_or(defaults.default_max_retries),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(defaults.default_retry_delay_ms),
            timeout_ms: self.timeout_ms.unwrap_or(defaults.default_timeout_ms),
        }
    }
}

impl WorkflowDefinition {
    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, GatewayError> {
        serde_yaml::from_str(yaml).map_err(|e| {
            GatewayError::Validation(format!("Failed to parse workflow YAML: {}", e))
        })
    }

    /// Parse a workflow definition from a JSON value.
    pub fn from_json(value: serde_json::Value) -> Result<Self, GatewayError> {
        serde_json::from_value(value).map_err(|e| {
            GatewayError::Validation(format!("Failed to parse workflow JSON: {}", e))
        })
    }

    /// Load a workflow definition from a file path (`.json` or YAML).
    pub fn from_file(path: &str) -> Result<Self, GatewayError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::Validation(format!("Failed to read workflow file '{}': {}", path, e))
        })?;
        if path.ends_with(".json") {
            let value = serde_json::from_str(&content).map_err(|e| {
                GatewayError::Validation(format!("Failed to parse workflow JSON: {}", e))
            })?;
            Self::from_json(value)
        } else {
            Self::from_yaml(&content)
        }
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Structural validation; must pass before any step executes.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::Validation("Workflow id is required".into()));
        }
        if self.steps.is_empty() {
            return Err(GatewayError::Validation(format!(
                "Workflow '{}' has no steps",
                self.id
            )));
        }
        if self.concurrency_limit == 0 {
            return Err(GatewayError::Validation(
                "concurrencyLimit must be at least 1".into(),
            ));
        }

        let mut seen = HashSet::new();
        for (index, step) in self.steps.iter().enumerate() {
            if step.id.trim().is_empty() {
                return Err(GatewayError::Validation(format!(
                    "Step #{} is missing an id",
                    index + 1
                )));
            }
            if step.tool_id.trim().is_empty() {
                return Err(GatewayError::Validation(format!(
                    "Step '{}' is missing a toolId",
                    step.id
                )));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(GatewayError::Validation(format!(
                    "Duplicate step id '{}'",
                    step.id
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(GatewayError::Validation(format!(
                        "Step '{}' depends on unknown step '{}'",
                        step.id, dep
                    )));
                }
            }
        }

        if let Some(cycle) = self.find_cycle() {
            return Err(GatewayError::Validation(format!(
                "Cycle detected at step '{}': {}",
                cycle[0],
                cycle.join(" -> ")
            )));
        }

        Ok(())
    }

    /// Depth-first search over dependency edges with an explicit recursion
    /// stack. Returns the cycle path starting and ending at the revisited step.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let edges: HashMap<&str, &[String]> = self
            .steps
            .iter()
            .map(|s| (s.id.as_str(), s.dependencies.as_slice()))
            .collect();

        let mut visited: HashSet<&str> = HashSet::new();
        let mut on_stack: HashSet<&str> = HashSet::new();
        let mut path: Vec<&str> = Vec::new();

        for step in &self.steps {
            if !visited.contains(step.id.as_str()) {
                if let Some(cycle) =
                    visit(&step.id, &edges, &mut visited, &mut on_stack, &mut path)
                {
                    return Some(cycle);
                }
            }
        }
        None
    }
}

fn visit<'a>(
    current: &'a str,
    edges: &HashMap<&'a str, &'a [String]>,
    visited: &mut HashSet<&'a str>,
    on_stack: &mut HashSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    visited.insert(current);
    on_stack.insert(current);
    path.push(current);

    for dep in edges.get(current).copied().unwrap_or_default() {
        let dep = dep.as_str();
        if on_stack.contains(dep) {
            let start = path.iter().position(|id| *id == dep).unwrap_or(0);
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(dep.to_string());
            return Some(cycle);
        }
        if !visited.contains(dep) {
            if let Some(cycle) = visit(dep, edges, visited, on_stack, path) {
                return Some(cycle);
            }
        }
    }

    on_stack.remove(current);
    path.pop();
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(id: &str, deps: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            tool_id: "t".to_string(),
            params: serde_json::Value::Null,
            dependencies: deps.iter().map(|d| d.to_string()).collect(),
            required: true,
            max_retries: None,
            retry_delay_ms: None,
            timeout_ms: None,
        }
    }

    fn workflow(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        WorkflowDefinition {
            id: "wf".to_string(),
            name: None,
            description: None,
            steps,
            concurrency_limit: 1,
            halt_on_failure: true,
        }
    }

    #[test]
    fn test_parse_minimal_workflow() {
        let yaml = r#"
id: "etl"
steps:
  - id: "fetch"
    toolId: "t1"
  - id: "transform"
    toolId: "t2"
    deps: ["fetch"]
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        assert_eq!(wf.id, "etl");
        assert_eq!(wf.concurrency_limit, 1);
        assert!(wf.halt_on_failure);
        assert_eq!(wf.steps[1].dependencies, vec!["fetch".to_string()]);
        assert!(wf.steps[1].required);
        wf.validate().unwrap();
    }

    #[test]
    fn test_parse_json_with_overrides() {
        let wf = WorkflowDefinition::from_json(serde_json::json!({
            "id": "wf",
            "concurrencyLimit": 3,
            "haltOnFailure": false,
            "steps": [
                { "id": "a", "toolId": "t", "maxRetries": 0, "timeoutMs": 50, "required": false }
            ]
        }))
        .unwrap();
        let policy = wf.steps[0].policy(&EngineConfig::default());
        assert_eq!(policy.max_retries, 0);
        assert_eq!(policy.timeout_ms, 50);
        assert_eq!(policy.retry_delay_ms, 1000);
        assert!(!wf.steps[0].required);
        assert_eq!(wf.concurrency_limit, 3);
    }

    #[test]
    fn test_rejects_empty_steps() {
        let err = workflow(vec![]).validate().unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn test_rejects_missing_tool_id() {
        let mut s = step("a", &[]);
        s.tool_id.clear();
        let err = workflow(vec![s]).validate().unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Step 'a' is missing a toolId");
    }

    #[test]
    fn test_rejects_unknown_dependency_and_duplicates() {
        assert!(workflow(vec![step("a", &["ghost"])]).validate().is_err());
        assert!(workflow(vec![step("a", &[]), step("a", &[])]).validate().is_err());
    }

    #[test]
    fn test_detects_two_step_cycle() {
        let wf = workflow(vec![step("A", &["B"]), step("B", &["A"])]);
        let cycle = wf.find_cycle().unwrap();
        assert_eq!(cycle, vec!["A", "B", "A"]);
        let err = wf.validate().unwrap_err();
        assert!(err.to_string().contains("Cycle detected at step 'A'"));
    }

    #[test]
    fn test_detects_self_loop_and_deep_cycle() {
        assert!(workflow(vec![step("a", &["a"])]).find_cycle().is_some());

        let wf = workflow(vec![
            step("a", &[]),
            step("b", &["a", "d"]),
            step("c", &["b"]),
            step("d", &["c"]),
        ]);
        let cycle = wf.find_cycle().unwrap();
        assert_eq!(cycle.first(), cycle.last());
        assert!(!cycle.contains(&"a".to_string()));
    }

    #[test]
    fn test_diamond_is_acyclic() {
        let wf = workflow(vec![
            step("a", &[]),
            step("b", &["a"]),
            step("c", &["a"]),
            step("d", &["b", "c"]),
        ]);
        assert!(wf.find_cycle().is_none());
        wf.validate().unwrap();
    }
}
