//! Worker process lifecycle management.
//!
//! Launches workers as child processes, reads their NDJSON stdout,
//! forwards their stderr into the supervisor log with parsed severity,
//! monitors heartbeats, and restarts on failure with bounded backoff.
//!
//! # Module Structure
//!
//! - [`supervisor`] - The worker registry, pumps, and health monitor
//! - [`stderr`] - Severity parsing for forwarded worker stderr
//! - [`audio`] - Audio unix-socket path lifecycle

pub mod audio;
pub mod stderr;
pub mod supervisor;

pub use supervisor::{WorkerEvent, WorkerSnapshot, WorkerSupervisor};
