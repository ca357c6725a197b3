//! Health Publisher data model
//! =================================
//!
//! [`HealthRecord`] and [`ProbeGate`] as defined in the data model: a
//! readers-writer-locked record with a stable JSON wire shape, and a
//! one-shot rendezvous that the first successfully served snapshot closes.

pub mod client;
pub mod publisher;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use time::OffsetDateTime;

pub use publisher::{HealthPublisherHandle, start_socket};

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum HealthError {
    #[error("health socket already in use at {path}")]
    SocketInUse { path: String },

    #[error("failed to {action} health socket at {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        #[serde(serialize_with = "crate::error::io_error_to_string")]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, HealthError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Starting,
    Running,
    Paused,
    PausedWithError,
    Failed,
}

impl HealthState {
    /// Maps a terminal health state to the healthcheck subcommand's exit
    /// code: `running -> 0`, `paused -> 78`, `paused_with_error -> 75`,
    /// `failed -> 1000`.
    pub fn healthcheck_exit_code(self) -> i32 {
        match self {
            HealthState::Starting | HealthState::Running => 0,
            HealthState::Paused => crate::options::PAUSED_SUCCESS_EXIT_CODE,
            HealthState::PausedWithError => crate::options::PAUSED_ERROR_EXIT_CODE,
            HealthState::Failed => crate::options::INTERNAL_EXIT_CODE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthRecord {
    pub state: HealthState,
    pub message: String,
    pub timestamp: OffsetDateTime,
    pub exit_code: i32,
}

impl HealthRecord {
    pub fn starting() -> Self {
        Self {
            state: HealthState::Starting,
            message: "starting".to_string(),
            timestamp: OffsetDateTime::now_utc(),
            exit_code: 0,
        }
    }

    /// Serializes to the stable wire shape: `state`, `time` (RFC 3339),
    /// `message`, `exit_code`. Unknown fields are tolerated by consumers,
    /// so this is intentionally the only shape we ever emit.
    pub fn to_wire(&self) -> serde_json::Value {
        let time = self
            .timestamp
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string());
        serde_json::json!({
            "state": self.state,
            "time": time,
            "message": self.message,
            "exit_code": self.exit_code,
        })
    }
}

/// A readers-writer-locked [`HealthRecord`] plus the [`ProbeGate`] that the
/// first successfully served snapshot closes. Owned by the Health
/// Publisher; the process runner and finalizer call [`update`](Self::update)
/// to mutate it.
pub struct SharedHealth {
    record: std::sync::RwLock<HealthRecord>,
    gate: ProbeGate,
}

impl SharedHealth {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            record: std::sync::RwLock::new(HealthRecord::starting()),
            gate: ProbeGate::new(),
        })
    }

    pub fn snapshot(&self) -> HealthRecord {
        self.record.read().expect("health record lock poisoned").clone()
    }

    /// Atomic replace of all four fields; invalidates nothing else; wakes
    /// nobody — observers poll.
    pub fn update(&self, state: HealthState, message: impl Into<String>, exit_code: i32) {
        let mut record = self.record.write().expect("health record lock poisoned");
        record.state = state;
        record.message = message.into();
        record.exit_code = exit_code;
        record.timestamp = OffsetDateTime::now_utc();
    }

    pub fn gate(&self) -> &ProbeGate {
        &self.gate
    }
}

/// One-shot rendezvous: initially closed-for-waiters; the first
/// successfully served health snapshot closes it, releasing all waiters.
/// Idempotent — further probes leave it closed.
pub struct ProbeGate {
    opened: AtomicBool,
    pair: Arc<(Mutex<bool>, Condvar)>,
}

impl ProbeGate {
    pub fn new() -> Self {
        Self {
            opened: AtomicBool::new(false),
            pair: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Opens the gate. Safe to call more than once; only the first call has
    /// any effect.
    pub fn open(&self) {
        if self.opened.swap(true, Ordering::SeqCst) {
            return;
        }
        let (lock, cvar) = &*self.pair;
        let mut done = lock.lock().expect("probe gate mutex poisoned");
        *done = true;
        cvar.notify_all();
    }

    pub fn is_open(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    /// Blocks until the gate opens or `cancel` fires, whichever is first.
    /// Returns `true` if the gate opened, `false` if cancellation won the
    /// race.
    pub fn wait(&self, cancel: &crate::cancel::CancelToken) -> bool {
        loop {
            if self.is_open() {
                return true;
            }
            if cancel.is_cancelled() {
                return false;
            }
            let (lock, cvar) = &*self.pair;
            let guard = lock.lock().expect("probe gate mutex poisoned");
            let _ = cvar
                .wait_timeout_while(guard, std::time::Duration::from_millis(100), |done| {
                    !*done
                })
                .expect("probe gate condvar poisoned");
        }
    }
}

impl Default for ProbeGate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn gate_opens_exactly_once() {
        let gate = ProbeGate::new();
        assert!(!gate.is_open());
        gate.open();
        assert!(gate.is_open());
        gate.open(); // idempotent
        assert!(gate.is_open());
    }

    #[test]
    fn gate_wait_unblocks_on_open() {
        let gate = Arc::new(ProbeGate::new());
        let waiter = gate.clone();
        let handle = thread::spawn(move || waiter.wait(&crate::cancel::CancelToken::new()));
        thread::sleep(Duration::from_millis(20));
        gate.open();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn gate_wait_respects_cancel() {
        let gate = ProbeGate::new();
        let cancel = crate::cancel::CancelToken::new();
        cancel.cancel();
        assert!(!gate.wait(&cancel));
    }

    #[test]
    fn health_record_wire_shape_has_stable_keys() {
        let record = HealthRecord::starting();
        let wire = record.to_wire();
        assert!(wire.get("state").is_some());
        assert!(wire.get("time").is_some());
        assert!(wire.get("message").is_some());
        assert!(wire.get("exit_code").is_some());
    }

    #[test]
    fn timestamp_non_decreasing_across_updates() {
        let state = SharedHealth::new();
        let first = state.snapshot().timestamp;
        thread::sleep(Duration::from_millis(5));
        state.update(HealthState::Running, "running", 0);
        let second = state.snapshot().timestamp;
        assert!(second >= first);
    }
}
