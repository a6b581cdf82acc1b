//! Workflow execution.
//!
//! Definitions are loaded from YAML or JSON, validated into a DAG and run by
//! [`WorkflowEngine`]. Each step invokes one tool through a [`ToolInvoker`].
//!
//! ```text
//! WorkflowDefinition (YAML/JSON)
//!        │ validate (ids, deps, cycles)
//!        ▼
//!   WorkflowEngine ── ready set ──▶ JoinSet (≤ concurrencyLimit)
//!        │                               │ retry / timeout
//!        ▼                               ▼
//!   WorkflowRun snapshots ◀──────── StepResult
//! ```
//!
//! [`ToolInvoker`]: crate::tools::ToolInvoker

pub mod executor;
pub mod memory;
pub mod metrics;
pub mod run;
pub mod schema;

pub use executor::WorkflowEngine;
pub use memory::{MemoryProbe, NoopMemoryProbe, ProcessMemoryProbe};
pub use metrics::{RunMetrics, StepMetric, SystemMetrics};
pub use run::{RunStatus, StepResult, StepStatus, WorkflowRun};
pub use schema::{StepPolicy, WorkflowDefinition, WorkflowStep};
