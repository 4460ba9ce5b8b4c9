use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::ExecError;

/// Signals the executor knows how to deliver to a process group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Terminate,
    Kill,
    Interrupt,
}

#[cfg(unix)]
impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
            Signal::Interrupt => libc::SIGINT,
        }
    }
}

/// Shared slot holding the pid of the running process group leader.
///
/// Cheap to clone; every clone addresses whatever process the owning
/// [`crate::Command`] is running at the time.
#[derive(Debug, Clone, Default)]
pub struct SignalHandle {
    pid: Arc<AtomicU32>,
}

impl SignalHandle {
    pub(crate) fn attach(&self, pid: u32) {
        self.pid.store(pid, Ordering::SeqCst);
    }

    pub(crate) fn detach(&self) {
        self.pid.store(0, Ordering::SeqCst);
    }

    pub fn pid(&self) -> Option<u32> {
        match self.pid.load(Ordering::SeqCst) {
            0 => None,
            pid => Some(pid),
        }
    }

    /// Deliver `signal` to the whole process group of the running command.
    pub fn send_signal(&self, signal: Signal) -> Result<(), ExecError> {
        let pid = self.pid().ok_or(ExecError::NotRunning)?;
        debug!(pid, ?signal, "Signalling process group");
        deliver(pid, signal)
    }
}

#[cfg(unix)]
fn deliver(pid: u32, signal: Signal) -> Result<(), ExecError> {
    let pgid = libc::pid_t::try_from(pid).map_err(|_| ExecError::NotRunning)?;
    // SAFETY: killpg has no memory-safety preconditions.
    let rc = unsafe { libc::killpg(pgid, signal.as_raw()) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Err(ExecError::NotRunning)
    } else {
        Err(err.into())
    }
}

// Without process groups the whole child tree is taken down instead.
#[cfg(not(unix))]
fn deliver(pid: u32, _signal: Signal) -> Result<(), ExecError> {
    let status = std::process::Command::new("taskkill")
        .args(["/T", "/F", "/PID", &pid.to_string()])
        .status()?;
    if status.success() {
        Ok(())
    } else {
        Err(ExecError::NotRunning)
    }
}
