//! Command-line interface for agent-replay.
//!
//! Provides commands for replaying merged changes against an agent and
//! for inspecting the resulting run databases.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
