//! Command-line interface for biomlbench-agents.
//!
//! Provides commands for building agent and base-environment images,
//! listing registered agents, and launching agents inside their container.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
