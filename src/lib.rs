//! execd: a sandbox execution daemon.
//!
//! Accepts HTTP requests to run user-supplied code and shell commands inside
//! the daemon's own namespace and streams results back over server-sent
//! events. Three execution backends: a remote Jupyter server for language
//! kernels, direct child processes for shell commands, and a local relational
//! database for SQL.

pub mod api;
pub mod config;
pub mod jupyter;
pub mod runtime;
