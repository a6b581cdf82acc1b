//! In-memory stores owned by the router.

pub mod agent_store;
pub mod task_store;

pub use agent_store::{AgentStore, Registered};
pub use task_store::{Insert, TaskStore};
