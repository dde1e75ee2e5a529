//! Daily usage limiter for YouTube
//!
//! Tracks time spent on restricted sites against a per-user daily limit,
//! resets the counter at local midnight and blocks the site once the limit
//! is reached.

pub mod backend;
pub mod cli;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod limits;
pub mod site;

pub use daemon::{DaemonServices, DaemonSettings, LimiterDaemon, SessionStatus};
pub use error::{ErrorKind, LimiterError};
