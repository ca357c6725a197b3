//! Process Runner errors.

#[derive(serde::Serialize, Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn child process: {source}")]
    Spawn {
        #[source]
        #[serde(serialize_with = "crate::error::io_error_to_string")]
        source: std::io::Error,
    },

    #[error("failed to {action} child process: {source}")]
    CommandFailed {
        action: &'static str,
        #[source]
        #[serde(serialize_with = "crate::error::io_error_to_string")]
        source: std::io::Error,
    },

    #[error("insufficient privilege to {action}: {source}")]
    PermissionDenied {
        action: &'static str,
        #[source]
        #[serde(serialize_with = "crate::error::io_error_to_string")]
        source: std::io::Error,
    },

    #[error("{operation} exceeded {elapsed:?}; process still running")]
    TerminationTimeout {
        operation: &'static str,
        elapsed: std::time::Duration,
    },
}

pub type Result<T> = std::result::Result<T, ProcessError>;
