//! Process Runner
//! ====================
//!
//! Forks the child, wires stdout/stderr fan-out, enforces the timeout, and
//! performs graceful termination (SIGINT → grace → SIGKILL): run one child
//! to completion and capture its outcome.

pub mod error;
pub mod runner;

pub use error::{ProcessError, Result};
pub use runner::{ChildRunner, ChildOutcome};

use std::time::Duration;

pub(crate) const POLL_INTERVAL_MS: u64 = 100;

/// Sends `SIGTERM`; gone-already and not-found are both treated as success.
#[cfg(unix)]
pub(crate) fn terminate(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(_) | Err(Errno::ESRCH) => Ok(()),
        Err(Errno::EPERM) => Err(ProcessError::PermissionDenied {
            action: "send SIGTERM",
            source: std::io::Error::from_raw_os_error(Errno::EPERM as i32),
        }),
        Err(e) => Err(ProcessError::CommandFailed {
            action: "send SIGTERM",
            source: std::io::Error::from_raw_os_error(e as i32),
        }),
    }
}

#[cfg(unix)]
pub(crate) fn force_kill(pid: u32) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(_) | Err(Errno::ESRCH) => Ok(()),
        Err(Errno::EPERM) => Err(ProcessError::PermissionDenied {
            action: "send SIGKILL",
            source: std::io::Error::from_raw_os_error(Errno::EPERM as i32),
        }),
        Err(e) => Err(ProcessError::CommandFailed {
            action: "send SIGKILL",
            source: std::io::Error::from_raw_os_error(e as i32),
        }),
    }
}

/// Checks whether `pid` is still alive via `kill(pid, 0)`, treating a
/// zombie (state `Z` in `/proc`) as not alive on Linux.
#[cfg(unix)]
pub(crate) fn pid_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    match kill(Pid::from_raw(pid as i32), None) {
        Err(Errno::ESRCH) => return false,
        Err(_) => return true,
        Ok(_) => (),
    }

    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string(format!("/proc/{pid}/status")) {
            if status
                .lines()
                .find(|l| l.starts_with("State:"))
                .and_then(|l| l.split_whitespace().nth(1))
                == Some("Z")
            {
                return false;
            }
        }
    }
    true
}

pub(crate) fn poll_interval() -> Duration {
    Duration::from_millis(POLL_INTERVAL_MS)
}
