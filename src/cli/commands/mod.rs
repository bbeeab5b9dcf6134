//! Command implementations for the CLI.

pub mod check;
pub mod config;
pub mod run;
