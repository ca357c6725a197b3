//! Finalizer
//! =========
//!
//! The phase after child exit that sequences artifact bundling and
//! optional pausing. Artifact-bundle happens before pause (so a paused
//! container's bundle is complete and exportable); a bundle failure always
//! masks the child's own exit code with 1000, so a corrupt or partial
//! bundle never gets reported to the orchestrator as a clean run.

use std::sync::Arc;

use crate::bundle;
use crate::cancel::CancelToken;
use crate::health::{HealthState, SharedHealth};
use crate::options::{
    PauseMode, SupervisionOptions, INTERNAL_EXIT_CODE, PAUSED_ERROR_EXIT_CODE,
    PAUSED_SUCCESS_EXIT_CODE,
};
use crate::pause;
use crate::paths::PAUSE_FIFO_PATH;
use crate::process::ChildOutcome;

/// Runs the finalizer for a completed (or internally-failed) child run and
/// returns the process's final exit code.
pub fn finalize(options: &SupervisionOptions, health: &Arc<SharedHealth>, outcome: ChildOutcome) -> i32 {
    let (child_code, stderr_excerpt) = match outcome {
        ChildOutcome::Exited { code, stderr_excerpt } => (code, stderr_excerpt),
        ChildOutcome::Internal(err) => {
            // Timeout/cancel and spawn/wait failures always surface as the
            // internal exit code; they never enter the pause table below,
            // which only governs normal child exits, success or error. The
            // bundle still runs regardless.
            tracing::error!(error = %err, "child run ended internally");
            health.update(HealthState::Failed, err.to_string(), INTERNAL_EXIT_CODE);
            let _ = bundle::bundle(&options.artifacts_dir, &options.artifact_bundle_path);
            return INTERNAL_EXIT_CODE;
        }
    };

    let success = child_code == 0;
    let pauses = is_pause_row(success, options.pause_mode);

    let bundle_failed = bundle::bundle(&options.artifacts_dir, &options.artifact_bundle_path).is_err();

    if bundle_failed {
        tracing::error!("artifact bundling failed; masking child exit code with internal failure");
        // A bundle failure always surfaces as 1000, even on a pause path
        // that is already committed — the worst of the two codes wins.
        // Combinations that were never going to pause (e.g. a success
        // under on-error) still don't pause just because bundling failed.
        // The exit code is 1000 either way the pause goes.
        if pauses {
            let _ = run_pause(health, INTERNAL_EXIT_CODE);
        }
        return INTERNAL_EXIT_CODE;
    }

    match (success, options.pause_mode) {
        (true, PauseMode::Never) | (true, PauseMode::OnError) => child_code,
        (true, PauseMode::Always) => {
            health.update(HealthState::Paused, "paused after success", PAUSED_SUCCESS_EXIT_CODE);
            match run_pause(health, PAUSED_SUCCESS_EXIT_CODE) {
                Ok(()) => PAUSED_SUCCESS_EXIT_CODE,
                Err(_) => INTERNAL_EXIT_CODE,
            }
        }
        (false, PauseMode::Never) => {
            let message = match &stderr_excerpt {
                Some(excerpt) => format!("child exited with an error: {excerpt}"),
                None => "child exited with an error".to_string(),
            };
            health.update(HealthState::Failed, message, child_code);
            child_code
        }
        (false, PauseMode::OnError) | (false, PauseMode::Always) => {
            let message = match &stderr_excerpt {
                Some(excerpt) => format!("paused after error: {excerpt}"),
                None => "paused after error".to_string(),
            };
            health.update(HealthState::PausedWithError, message, PAUSED_ERROR_EXIT_CODE);
            match run_pause(health, PAUSED_ERROR_EXIT_CODE) {
                Ok(()) => child_code,
                Err(_) => INTERNAL_EXIT_CODE,
            }
        }
    }
}

/// The three `(success, pause_mode)` combinations the state-machine table
/// pauses on. A bundle failure never pauses a combination this table
/// wouldn't already have paused.
fn is_pause_row(success: bool, pause_mode: PauseMode) -> bool {
    matches!(
        (success, pause_mode),
        (true, PauseMode::Always) | (false, PauseMode::OnError) | (false, PauseMode::Always)
    )
}

/// Pausing uses its own independent cancellation scope so operator
/// interaction survives a supervisor-level timeout. If pausing itself
/// fails (FIFO creation error, interrupted before a resume byte arrives),
/// the caller must surface the internal failure code instead of the
/// exit code it had already decided on.
fn run_pause(health: &Arc<SharedHealth>, published_exit_code: i32) -> pause::Result<()> {
    let pause_cancel = CancelToken::fresh_sibling();
    crate::cancel::register_for_signals(&pause_cancel);
    match pause::pause(PAUSE_FIFO_PATH, &pause_cancel) {
        Ok(()) => {
            tracing::info!("pause released by resume signal");
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "pause failed");
            health.update(HealthState::Failed, e.to_string(), published_exit_code);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn opts(pause_mode: PauseMode, artifacts: &std::path::Path, bundle_path: &std::path::Path) -> SupervisionOptions {
        SupervisionOptions::builder()
            .argv(vec!["echo".into()])
            .pause_mode(pause_mode)
            .artifacts_dir(artifacts.to_path_buf())
            .artifact_bundle_path(bundle_path.to_path_buf())
            .build()
    }

    #[test]
    fn success_never_pause_passes_through_zero() {
        let artifacts = tempdir().unwrap();
        let bundle_path = tempdir().unwrap().path().join("b.tar.gz");
        let options = opts(PauseMode::Never, artifacts.path(), &bundle_path);
        let health = SharedHealth::new();
        let code = finalize(&options, &health, ChildOutcome::Exited { code: 0, stderr_excerpt: None });
        assert_eq!(code, 0);
    }

    #[test]
    fn error_never_pause_passes_through_child_code() {
        let artifacts = tempdir().unwrap();
        let bundle_path = tempdir().unwrap().path().join("b.tar.gz");
        let options = opts(PauseMode::Never, artifacts.path(), &bundle_path);
        let health = SharedHealth::new();
        let code = finalize(
            &options,
            &health,
            ChildOutcome::Exited { code: 42, stderr_excerpt: Some("boom\n".to_string()) },
        );
        assert_eq!(code, 42);
        assert!(health.snapshot().message.contains("boom"));
    }

    #[test]
    fn success_on_error_bundle_failure_does_not_pause() {
        let artifacts = tempdir().unwrap();
        let blocker = tempdir().unwrap().path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let bundle_path = blocker.join("nested").join("b.tar.gz");
        let options = opts(PauseMode::OnError, artifacts.path(), &bundle_path);
        let health = SharedHealth::new();
        // A success under on-error never pauses; if it somehow did here,
        // this test would hang waiting on a FIFO nobody resumes.
        let code = finalize(&options, &health, ChildOutcome::Exited { code: 0, stderr_excerpt: None });
        assert_eq!(code, INTERNAL_EXIT_CODE);
    }

    #[test]
    fn bundle_failure_masks_successful_exit_with_internal_code() {
        let artifacts = tempdir().unwrap();
        // Make the bundle destination unwritable by pointing it at a path
        // whose parent cannot be created (a file masquerading as a dir).
        let blocker = tempdir().unwrap().path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let bundle_path = blocker.join("nested").join("b.tar.gz");
        let options = opts(PauseMode::Never, artifacts.path(), &bundle_path);
        let health = SharedHealth::new();
        let code = finalize(&options, &health, ChildOutcome::Exited { code: 0, stderr_excerpt: None });
        assert_eq!(code, INTERNAL_EXIT_CODE);
    }
}
