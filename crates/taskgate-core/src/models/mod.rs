pub mod agent;
pub mod task;

pub use agent::*;
pub use task::*;
