//! Health Publisher — client side
//! ====================================
//!
//! The `healthcheck` subcommand dials the health publisher's socket, reads
//! the one snapshot it's served, and maps the returned state to an exit
//! code: `running -> 0`, `paused -> 78`, `paused_with_error -> 75`,
//! `failed -> 1000`. A single fixed-path, single-shot read — no request
//! framing needed since this is a pure push-snapshot protocol, not
//! request/response HTTP.

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::Duration;

use super::{HealthError, HealthState, Result};

#[derive(Debug, serde::Deserialize)]
struct WireSnapshot {
    state: HealthState,
    #[allow(dead_code)]
    time: String,
    #[allow(dead_code)]
    message: String,
    #[allow(dead_code)]
    exit_code: i32,
}

/// Connects to the health socket at `path`, reads one snapshot, and
/// returns the exit code the healthcheck subcommand should terminate with.
pub fn probe_exit_code(path: impl AsRef<Path>) -> Result<i32> {
    let path = path.as_ref();
    let mut stream = UnixStream::connect(path).map_err(|e| HealthError::Io {
        action: "connect",
        path: path.display().to_string(),
        source: e,
    })?;
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .map_err(|e| HealthError::Io {
            action: "set read timeout on",
            path: path.display().to_string(),
            source: e,
        })?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).map_err(|e| HealthError::Io {
        action: "read",
        path: path.display().to_string(),
        source: e,
    })?;

    let snapshot: WireSnapshot = serde_json::from_slice(&buf).map_err(|e| HealthError::Io {
        action: "decode",
        path: path.display().to_string(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
    })?;

    Ok(snapshot.state.healthcheck_exit_code())
}
