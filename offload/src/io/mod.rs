//! I/O helpers: configuration, the execution log store, and subprocess dry runs.

pub mod config;
pub mod dry_run;
pub mod execution_log;
pub mod process;
