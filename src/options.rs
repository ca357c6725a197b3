//! Supervision options
//! ===================
//!
//! Immutable configuration assembled once at dispatch and threaded through
//! the whole supervise pipeline. Built with [`bon::Builder`]: a handful of
//! fields with concrete defaults, constructed once before a single
//! `run`-style entry point.

use std::path::PathBuf;
use std::time::Duration;

use bon::Builder;

/// Distinguished internal failure code (never a valid child exit code).
pub const INTERNAL_EXIT_CODE: i32 = 1000;
/// Finalizer published this when pausing after a successful child exit.
pub const PAUSED_SUCCESS_EXIT_CODE: i32 = 78;
/// Finalizer published this when pausing after a failed child exit.
pub const PAUSED_ERROR_EXIT_CODE: i32 = 75;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PauseMode {
    #[default]
    Never,
    OnError,
    Always,
}

impl std::str::FromStr for PauseMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(PauseMode::Never),
            "on-error" | "on_error" => Ok(PauseMode::OnError),
            "always" => Ok(PauseMode::Always),
            other => Err(format!("invalid pause mode: {other}")),
        }
    }
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_grace_period() -> Duration {
    Duration::from_secs(15)
}

fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("/imagetest/artifacts")
}

pub(crate) fn default_artifact_bundle_path() -> PathBuf {
    PathBuf::from("/tmp/imagetest-artifacts.tar.gz")
}

#[derive(Debug, Clone, Builder)]
pub struct SupervisionOptions {
    #[builder(default)]
    pub process_log_path: Option<PathBuf>,

    #[builder(default = default_command_timeout())]
    pub command_timeout: Duration,

    #[builder(default = default_grace_period())]
    pub grace_period: Duration,

    #[builder(default = true)]
    pub wait_for_probe: bool,

    #[builder(default)]
    pub pause_mode: PauseMode,

    #[builder(default = default_artifacts_dir())]
    pub artifacts_dir: PathBuf,

    #[builder(default = default_artifact_bundle_path())]
    pub artifact_bundle_path: PathBuf,

    pub argv: Vec<String>,
}

impl SupervisionOptions {
    pub fn validate(&self) -> Result<(), crate::error::SupervisorError> {
        if self.argv.is_empty() {
            return Err(crate::error::SupervisorError::MissingCommand);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let opts = SupervisionOptions::builder()
            .argv(vec!["echo".into(), "hi".into()])
            .build();
        assert_eq!(opts.command_timeout, Duration::from_secs(3600));
        assert_eq!(opts.grace_period, Duration::from_secs(15));
        assert!(opts.wait_for_probe);
        assert_eq!(opts.pause_mode, PauseMode::Never);
        assert_eq!(opts.artifacts_dir, PathBuf::from("/imagetest/artifacts"));
        assert_eq!(
            opts.artifact_bundle_path,
            PathBuf::from("/tmp/imagetest-artifacts.tar.gz")
        );
    }

    #[test]
    fn empty_argv_fails_validation() {
        let opts = SupervisionOptions::builder().argv(vec![]).build();
        assert!(matches!(
            opts.validate(),
            Err(crate::error::SupervisorError::MissingCommand)
        ));
    }

    #[test]
    fn pause_mode_parses() {
        assert_eq!("never".parse::<PauseMode>().unwrap(), PauseMode::Never);
        assert_eq!(
            "on-error".parse::<PauseMode>().unwrap(),
            PauseMode::OnError
        );
        assert_eq!("always".parse::<PauseMode>().unwrap(), PauseMode::Always);
        assert!("bogus".parse::<PauseMode>().is_err());
    }
}
