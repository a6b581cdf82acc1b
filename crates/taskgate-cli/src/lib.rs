//! taskgate CLI library: command implementations shared by the binary and tests.

pub mod commands;
