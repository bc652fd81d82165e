//! CLI-specific functionality for the `metateam` binary
//!
//! Argument parsing lives in [`args`], subcommand bodies in [`commands`].

pub mod args;
pub mod commands;

pub use args::{Args, ExecutionMode, GlobalOptions};
pub use commands::{load_config, run};
