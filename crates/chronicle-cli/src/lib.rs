//! CLI entry point: argument parsing, layered configuration, logging
//! init, and dispatch to `chronicle-manager`. Maps manager-level failures
//! to the process exit codes spec.md §6 defines for a CLI wrapper.

pub mod cli;
pub mod commands;
pub mod config;
pub mod exit;
pub mod output;

pub use cli::Cli;
pub use config::Config;
