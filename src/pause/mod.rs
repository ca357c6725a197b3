//! Pause Controller
//! ======================
//!
//! Creates a named pipe, waits until a single byte arrives (or the
//! pause-local cancellation context fires), and implements resume. Uses an
//! independent [`CancelToken`]: the parent supervision context may already
//! be cancelled by timeout, and pause must still give a human operator a
//! chance to interact. The FIFO is a scoped acquisition with deferred
//! cleanup on every exit path, success or error. The wait itself polls a
//! non-blocking read rather than parking a thread in a blocking open —
//! the same bounded-poll idiom [`CancelToken::wait_timeout`] and
//! [`crate::health::ProbeGate::wait`] use, so no thread outlives this call.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{close, read};

use crate::cancel::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum PauseError {
    #[error("failed to {action} pause FIFO at {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        #[serde(serialize_with = "crate::error::io_error_to_string")]
        source: std::io::Error,
    },

    #[error("pause was cancelled before a resume byte arrived")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, PauseError>;

/// RAII guard that unlinks the FIFO on every exit path, success or error.
struct FifoGuard {
    path: PathBuf,
}

impl Drop for FifoGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Waits until a single byte is read from the FIFO at `path`, or `cancel`
/// fires. Always removes the FIFO on exit, regardless of outcome.
pub fn pause(path: impl AsRef<Path>, cancel: &CancelToken) -> Result<()> {
    let path = path.as_ref();

    if path.exists() {
        std::fs::remove_file(path).map_err(|e| PauseError::Io {
            action: "remove stale",
            path: path.display().to_string(),
            source: e,
        })?;
    }

    create_fifo(path)?;
    let _guard = FifoGuard {
        path: path.to_path_buf(),
    };

    // Opened read-write rather than read-only: for a FIFO, holding our own
    // write end open means a non-blocking read never observes EOF before a
    // real writer connects, so it can return EAGAIN and be polled instead.
    let fd = open(path, OFlag::O_RDWR | OFlag::O_NONBLOCK, Mode::empty()).map_err(|e| {
        PauseError::Io {
            action: "open",
            path: path.display().to_string(),
            source: std::io::Error::from_raw_os_error(e as i32),
        }
    })?;

    let result = read_one_byte(fd, path, cancel);
    let _ = close(fd);
    result
}

fn read_one_byte(fd: std::os::unix::io::RawFd, path: &Path, cancel: &CancelToken) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        match read(fd, &mut byte) {
            Ok(n) if n > 0 => return Ok(()),
            Ok(_) => {} // no writer connected yet; keep polling
            Err(Errno::EAGAIN) => {}
            Err(e) => {
                return Err(PauseError::Io {
                    action: "read from",
                    path: path.display().to_string(),
                    source: std::io::Error::from_raw_os_error(e as i32),
                });
            }
        }

        if cancel.wait_timeout(POLL_INTERVAL) {
            return Err(PauseError::Cancelled);
        }
    }
}

/// Writes a single resume byte to the FIFO at `path`. Used by the `export`
/// subcommand to release a sibling supervisor paused in `wait` mode.
pub fn resume(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let mut file = OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(|e| PauseError::Io {
            action: "open for resume-write",
            path: path.display().to_string(),
            source: e,
        })?;
    use std::io::Write;
    file.write_all(&[1u8]).map_err(|e| PauseError::Io {
        action: "write resume byte to",
        path: path.display().to_string(),
        source: e,
    })
}

#[cfg(unix)]
fn create_fifo(path: &Path) -> Result<()> {
    nix::unistd::mkfifo(path, Mode::from_bits_truncate(0o622)).map_err(|e| PauseError::Io {
        action: "create",
        path: path.display().to_string(),
        source: std::io::Error::from_raw_os_error(e as i32),
    })
}
