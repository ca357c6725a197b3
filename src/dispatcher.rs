//! Mode Dispatcher
//! ===============
//!
//! Reads argv and the `IMAGETEST_PAUSE_MODE` environment variable. If
//! `argv[1]` names a known subcommand (`healthcheck`, `wait`, `export`),
//! control is delegated to that component and the supervise pipeline is
//! bypassed entirely. Otherwise the remainder of argv is parsed as
//! supervise-mode flags plus a trailing child command.
//!
//! Also installs the process-wide SIGINT/SIGTERM handler that cancels the
//! root [`CancelToken`](crate::cancel::CancelToken); every blocking
//! operation downstream honors that token.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::bundle;
use crate::cancel::CancelToken;
use crate::finalizer;
use crate::health::{self, SharedHealth};
use crate::options::{PauseMode, SupervisionOptions, INTERNAL_EXIT_CODE};
use crate::pause;
use crate::paths::{HEALTH_SOCKET_PATH, PAUSE_FIFO_PATH, STDERR_MIRROR_PATH};
use crate::process::ChildRunner;

const HEALTHCHECK: &str = "healthcheck";
const WAIT: &str = "wait";
const EXPORT: &str = "export";

/// Entry point called by `src/bin/entrypoint.rs`. Consumes the process's
/// own `argv`/environment and returns the exit code the binary should
/// terminate with.
pub fn run() -> i32 {
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some(HEALTHCHECK) => run_healthcheck(),
        Some(WAIT) => run_wait(),
        Some(EXPORT) => run_export(&args[2..]),
        _ => run_supervise(&args[1..]),
    }
}

/// Connects to the health socket, reads the one snapshot it serves, and
/// maps the resulting state to the healthcheck subcommand's exit code.
fn run_healthcheck() -> i32 {
    match health::client::probe_exit_code(HEALTH_SOCKET_PATH) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "healthcheck probe failed");
            INTERNAL_EXIT_CODE
        }
    }
}

/// Wait mode: only the health publisher and pause controller run. A
/// sibling `export` invocation releases this process by writing a resume
/// byte to the pause FIFO.
fn run_wait() -> i32 {
    let health = SharedHealth::new();
    let mut publisher = match health::start_socket(HEALTH_SOCKET_PATH, health.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start health socket in wait mode");
            return INTERNAL_EXIT_CODE;
        }
    };
    health.update(health::HealthState::Running, "waiting for export", 0);

    let cancel = CancelToken::new();
    crate::cancel::register_for_signals(&cancel);

    let exit_code = match pause::pause(PAUSE_FIFO_PATH, &cancel) {
        Ok(()) => {
            tracing::info!("wait mode released by export's resume byte");
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "wait mode pause failed");
            INTERNAL_EXIT_CODE
        }
    };

    publisher.shutdown();
    exit_code
}

#[derive(Parser, Debug)]
#[command(name = "entrypoint", disable_help_subcommand = true)]
struct ExportArgs {
    /// Bundle path to stream to stdout; matches the supervise mode's
    /// `--artifact-path` default when omitted.
    #[arg(long, value_name = "PATH")]
    artifact_path: Option<PathBuf>,
}

/// Export mode: streams the already-built bundle to stdout, then writes a
/// resume byte through the pause FIFO so a sibling supervisor blocked in
/// `wait` mode can shut down.
fn run_export(argv: &[String]) -> i32 {
    let args = ExportArgs::try_parse_from(
        std::iter::once("entrypoint-export".to_string()).chain(argv.iter().cloned()),
    )
    .unwrap_or_else(|e| e.exit());
    let bundle_path = args
        .artifact_path
        .unwrap_or_else(crate::options::default_artifact_bundle_path);

    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    match bundle::export(&bundle_path, PAUSE_FIFO_PATH, &mut lock) {
        Ok(()) => {
            let _ = lock.flush();
            0
        }
        Err(e) => {
            tracing::error!(error = %e, "artifact export failed");
            INTERNAL_EXIT_CODE
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "entrypoint", trailing_var_arg = true, allow_hyphen_values = true)]
struct SuperviseArgs {
    /// Tee stdout+stderr into this file in addition to the parent's own
    /// streams and the stderr-mirror file.
    #[arg(long, value_name = "PATH")]
    process_log_path: Option<PathBuf>,

    /// Hard child wall-clock limit.
    #[arg(long, value_parser = parse_duration, default_value = "60m")]
    timeout: Duration,

    /// SIGINT -> SIGKILL delay once the timeout or a signal cancels the run.
    #[arg(long, value_parser = parse_duration, default_value = "15s")]
    grace_period: Duration,

    /// Require a probe before starting the child.
    #[arg(
        long,
        num_args = 0..=1,
        default_value = "true",
        default_missing_value = "true",
        value_parser = parse_bool
    )]
    wait_for_probe: bool,

    /// Bundle source directory.
    #[arg(long, value_name = "PATH", default_value = "/imagetest/artifacts")]
    artifacts_dir: PathBuf,

    /// Bundle destination path.
    #[arg(long, value_name = "PATH", default_value = "/tmp/imagetest-artifacts.tar.gz")]
    artifact_path: PathBuf,

    /// The child command and its arguments, after `--`.
    argv: Vec<String>,
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(format!("invalid boolean value: {other}")),
    }
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    let split_at = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .ok_or_else(|| format!("invalid duration: {s}"))?;
    let (num, unit) = s.split_at(split_at);
    let value: f64 = num.parse().map_err(|_| format!("invalid duration: {s}"))?;
    let seconds = match unit {
        "ns" => value / 1_000_000_000.0,
        "us" | "\u{b5}s" => value / 1_000_000.0,
        "ms" => value / 1_000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        other => return Err(format!("unknown duration unit: {other}")),
    };
    Ok(Duration::from_secs_f64(seconds))
}

fn pause_mode_from_env() -> PauseMode {
    match std::env::var("IMAGETEST_PAUSE_MODE") {
        Ok(value) if !value.is_empty() => value.parse().unwrap_or_else(|e| {
            tracing::warn!(error = %e, value, "invalid IMAGETEST_PAUSE_MODE; defaulting to never");
            PauseMode::Never
        }),
        _ => PauseMode::Never,
    }
}

/// Runs the full supervise pipeline: start the health publisher, run the
/// child (gated on the probe if requested), then hand off to the
/// finalizer, which bundles artifacts and may pause. The publisher is torn
/// down only after the final exit code is decided, so a last healthcheck
/// observes the terminal state.
fn run_supervise(argv: &[String]) -> i32 {
    let parsed = SuperviseArgs::try_parse_from(
        std::iter::once("entrypoint".to_string()).chain(argv.iter().cloned()),
    )
    .unwrap_or_else(|e| e.exit());

    let options = SupervisionOptions::builder()
        .maybe_process_log_path(parsed.process_log_path)
        .command_timeout(parsed.timeout)
        .grace_period(parsed.grace_period)
        .wait_for_probe(parsed.wait_for_probe)
        .pause_mode(pause_mode_from_env())
        .artifacts_dir(parsed.artifacts_dir)
        .artifact_bundle_path(parsed.artifact_path)
        .argv(parsed.argv)
        .build();

    if let Err(e) = options.validate() {
        tracing::error!(error = %e, "supervise mode rejected");
        return e.exit_code();
    }

    let health = SharedHealth::new();
    let mut publisher = match health::start_socket(HEALTH_SOCKET_PATH, health.clone()) {
        Ok(handle) => handle,
        Err(e) => {
            tracing::error!(error = %e, "failed to start health socket");
            return INTERNAL_EXIT_CODE;
        }
    };

    let cancel = CancelToken::new();
    crate::cancel::register_for_signals(&cancel);

    let runner = ChildRunner::new(&options, health.clone(), cancel, STDERR_MIRROR_PATH);
    let outcome = runner.run();

    let exit_code = finalizer::finalize(&options, &health, outcome);

    // Publisher teardown happens after the exit code is decided, so a
    // final healthcheck still observes the terminal state before the
    // socket disappears.
    publisher.shutdown();

    exit_code
}
