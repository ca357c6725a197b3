//! Health Publisher — server side
//! ====================================
//!
//! Binds a Unix stream socket at the well-known path, accepts connections
//! on a dedicated thread, and serves exactly one JSON snapshot per
//! connection. The accept loop is the one component explicitly permitted
//! to spawn fire-and-forget work (per-connection writer threads), bound to
//! the handle's teardown via a guard that stops the loop on `shutdown` or
//! `Drop`.

use std::io::Write;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use super::{HealthError, Result, SharedHealth};

/// RAII handle for the running accept loop. Dropping it (or calling
/// [`shutdown`](Self::shutdown)) stops the loop and unlinks the socket
/// path — idempotent and safe to call from any exit path.
pub struct HealthPublisherHandle {
    path: PathBuf,
    shutting_down: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl HealthPublisherHandle {
    pub fn shutdown(&mut self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // Connecting to our own socket unblocks a thread parked in accept().
        let _ = UnixStream::connect(&self.path);
        if let Some(handle) = self.accept_thread.take() {
            let _ = handle.join();
        }
        let _ = std::fs::remove_file(&self.path);
    }
}

impl Drop for HealthPublisherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Binds the Unix socket at `path`, unlinking a stale entry first. A true
/// "already in use" from an active listener still fails with
/// [`HealthError::SocketInUse`]. Returns the shared health state and a
/// teardown handle.
pub fn start_socket(path: impl AsRef<Path>, health: Arc<SharedHealth>) -> Result<HealthPublisherHandle> {
    let path = path.as_ref().to_path_buf();

    if path.exists() {
        match UnixStream::connect(&path) {
            Ok(_) => {
                return Err(HealthError::SocketInUse {
                    path: path.display().to_string(),
                });
            }
            Err(_) => {
                // Stale path with nobody listening; remove it before binding.
                let _ = std::fs::remove_file(&path);
            }
        }
    }

    let listener = UnixListener::bind(&path).map_err(|e| HealthError::Io {
        action: "bind",
        path: path.display().to_string(),
        source: e,
    })?;

    let shutting_down = Arc::new(AtomicBool::new(false));
    let accept_flag = shutting_down.clone();
    let accept_health = health.clone();
    let accept_path = path.clone();

    let accept_thread = std::thread::spawn(move || {
        accept_loop(listener, accept_health, accept_flag, accept_path);
    });

    Ok(HealthPublisherHandle {
        path,
        shutting_down,
        accept_thread: Some(accept_thread),
    })
}

fn accept_loop(
    listener: UnixListener,
    health: Arc<SharedHealth>,
    shutting_down: Arc<AtomicBool>,
    path: PathBuf,
) {
    for conn in listener.incoming() {
        if shutting_down.load(Ordering::SeqCst) {
            return;
        }
        match conn {
            Ok(stream) => {
                let health = health.clone();
                std::thread::spawn(move || serve_one(stream, health));
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "health socket accept error");
            }
        }
    }
}

/// Serves exactly one JSON snapshot, then closes. The first *successful*
/// write — not merely accepting the connection — opens the Probe Gate.
fn serve_one(mut stream: UnixStream, health: Arc<SharedHealth>) {
    let snapshot = health.snapshot();
    let body = match serde_json::to_vec(&snapshot.to_wire()) {
        Ok(body) => body,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode health snapshot");
            return;
        }
    };
    match stream.write_all(&body) {
        Ok(()) => health.gate().open(),
        Err(e) => tracing::warn!(error = %e, "failed to write health snapshot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn socket_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("entrypoint-test-{name}-{}.sock", std::process::id()))
    }

    #[test]
    fn serves_one_snapshot_and_opens_gate() {
        let health = SharedHealth::new();
        let path = socket_path("serve");
        let mut handle = start_socket(&path, health.clone()).unwrap();

        let mut stream = UnixStream::connect(&path).unwrap();
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&buf).unwrap();
        assert_eq!(value["state"], "starting");

        // Gate opens without a synchronous notification; poll briefly.
        let opened = health
            .gate()
            .wait(&crate::cancel::CancelToken::new());
        assert!(opened);

        handle.shutdown();
        assert!(!path.exists());
    }

    #[test]
    fn start_then_teardown_then_start_again_succeeds() {
        let health = SharedHealth::new();
        let path = socket_path("reuse");
        let mut handle = start_socket(&path, health.clone()).unwrap();
        handle.shutdown();
        assert!(!path.exists());

        let mut handle2 = start_socket(&path, health).unwrap();
        handle2.shutdown();
        assert!(!path.exists());
    }

    #[test]
    fn stale_socket_file_is_unlinked_and_rebound() {
        let path = socket_path("stale");
        // Leave behind a stale file that nobody is listening on.
        std::fs::write(&path, b"not a socket").unwrap();

        let health = SharedHealth::new();
        let mut handle = start_socket(&path, health).unwrap();
        handle.shutdown();
    }
}
