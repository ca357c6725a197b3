//! Structured logging
//! ===================
//!
//! A single `tracing-subscriber` layer on the supervisor's own stderr,
//! level controlled by `RUST_LOG` (defaulting to `info`). The teacher
//! crate additionally rotates logs through `tracing-appender` because it
//! runs as a long-lived library embedded in other processes; this binary
//! is a one-shot container entrypoint whose own stdout/stderr are already
//! captured by the orchestrator (and, when set, tee'd into
//! `process_log_path`), so a rotating file layer would just be a second,
//! redundant copy of the same lines.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
