//! Root cancellation context
//! ==========================
//!
//! A single [`CancelToken`] is the root of truth for the whole supervisor:
//! SIGINT/SIGTERM cancel it, and every blocking operation in the health
//! publisher, process runner, and artifact bundler polls it between bounded
//! waits rather than blocking indefinitely. The pause controller is the one
//! documented exception — it derives its own independent token so operator
//! interaction survives a parent timeout.

use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    pair: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            pair: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    /// Creates a token independent of `self`: cancelling one never cancels
    /// the other. Used by the pause controller so it can still honor
    /// SIGINT/SIGTERM without inheriting the supervisor's own timeout.
    pub fn fresh_sibling() -> Self {
        Self::new()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let (lock, cvar) = &*self.pair;
        let mut done = lock.lock().expect("cancel mutex poisoned");
        *done = true;
        cvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Blocks until cancelled or `timeout` elapses, whichever is first.
    /// Returns `true` if cancellation was observed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        let (lock, cvar) = &*self.pair;
        let guard = lock.lock().expect("cancel mutex poisoned");
        let (_guard, _result) = cvar
            .wait_timeout_while(guard, timeout, |done| !*done)
            .expect("cancel condvar poisoned");
        self.is_cancelled()
    }

    /// Polls `is_cancelled` at `poll_interval` cadence until `deadline`-style
    /// callers are satisfied or cancellation fires; small helper shared by
    /// every component that spins on a bounded wait.
    pub fn poll_until(&self, poll_interval: Duration, mut done: impl FnMut() -> bool) -> bool {
        loop {
            if done() {
                return true;
            }
            if self.wait_timeout(poll_interval) {
                return done();
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

fn signal_targets() -> &'static Mutex<Vec<CancelToken>> {
    static TARGETS: OnceLock<Mutex<Vec<CancelToken>>> = OnceLock::new();
    TARGETS.get_or_init(|| Mutex::new(Vec::new()))
}

/// Registers `token` to be cancelled on SIGINT/SIGTERM. The process-wide
/// `ctrlc` handler is installed at most once and, on delivery, cancels
/// every token registered so far — this is how the pause controller's
/// independent token still observes SIGINT/SIGTERM even though it is never
/// derived from the root context.
pub fn register_for_signals(token: &CancelToken) {
    static HANDLER_INSTALLED: OnceLock<()> = OnceLock::new();
    signal_targets()
        .lock()
        .expect("signal targets mutex poisoned")
        .push(token.clone());

    HANDLER_INSTALLED.get_or_init(|| {
        let _ = ctrlc::set_handler(|| {
            if let Ok(targets) = signal_targets().lock() {
                for target in targets.iter() {
                    target.cancel();
                }
            }
        });
    });
}
