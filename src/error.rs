//! Top-level error type for the supervisor.

use std::time::Duration;

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Process(#[from] crate::process::ProcessError),

    #[error(transparent)]
    Health(#[from] crate::health::HealthError),

    #[error(transparent)]
    Pause(#[from] crate::pause::PauseError),

    #[error(transparent)]
    Bundle(#[from] crate::bundle::BundleError),

    #[error("missing command: supervise mode requires a non-empty child command")]
    MissingCommand,

    #[error("child process timed out or was cancelled after {elapsed:?}")]
    TimedOut { elapsed: Duration },

    #[error("internal error: {0}")]
    Internal(String),
}

pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;

impl SupervisorError {
    /// Maps a terminal error to the supervisor's own exit code. Child exit
    /// codes are handled separately by the finalizer — this only covers the
    /// internal-failure branch, which always surfaces as 1000.
    pub fn exit_code(&self) -> i32 {
        crate::options::INTERNAL_EXIT_CODE
    }
}

pub(crate) fn io_error_to_string<S>(e: &impl std::fmt::Display, s: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    s.serialize_str(&e.to_string())
}
