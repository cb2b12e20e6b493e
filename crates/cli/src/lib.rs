//! `queuectl` binary internals: command tree, bootstrap, command handlers,
//! signal handling and the monitoring dashboard.

pub mod bootstrap;
pub mod cli;
pub mod commands;
pub mod dashboard;
pub mod shutdown;
