//! Runs one OS process at a time under a soft (SIGTERM) and a hard (SIGKILL)
//! deadline, capturing its output.
//!
//! The process leads its own process group, so signals reach everything it
//! spawned. Each deadline is an independent timer thread; both are cancelled
//! and joined before the outcome is looked at, and a cancelled timer never
//! signals.

mod command;
mod error;
mod signal;
mod timer;

pub use command::{Command, CommandOutput};
pub use error::ExecError;
pub use signal::{Signal, SignalHandle};
