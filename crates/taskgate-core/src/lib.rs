//! taskgate core: transport-agnostic domain logic for the task gateway.
//!
//! This crate contains the workflow execution engine, the agent registry and
//! task router, and the thin gateway that decides between the two. It has
//! **no HTTP server dependency** by default, making it suitable for use in:
//!
//! - HTTP servers (via `taskgate-server`)
//! - CLI tools (via `taskgate-cli`)
//! - embedding in other services
//!
//! # Architecture
//!
//! ```text
//! TaskGateway ──► AgentRouter ──► BuiltinHandler ──┐
//!      │               └────────► ExternalDispatcher (HTTP, callback)
//!      └────────► WorkflowEngine ───────────────────┴──► ToolInvoker
//! ```
//!
//! # Feature Flags
//!
//! - `axum`: Enables `IntoResponse` impl on `GatewayError` for use in axum handlers.

pub mod config;
pub mod error;
pub mod gateway;
pub mod models;
pub mod orchestration;
pub mod state;
pub mod store;
pub mod tools;
pub mod workflow;

// Convenience re-exports
pub use config::GatewayConfig;
pub use error::{ErrorBody, GatewayError};
pub use state::{AppState, AppStateInner};
