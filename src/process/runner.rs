//! Process Runner
//! ====================

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use wait_timeout::ChildExt;

use super::{error::ProcessError, poll_interval};
use crate::cancel::CancelToken;
use crate::error::SupervisorError;
use crate::health::SharedHealth;
use crate::options::SupervisionOptions;

/// Outcome of running the child to completion, per the data model: either
/// it exited with a code, or something internal to the supervisor failed.
/// A non-zero exit carries a snippet of the stderr-mirror file alongside
/// the code, so the finalizer can fold it into the health message and the
/// process log instead of reporting a bare number.
pub enum ChildOutcome {
    Exited { code: i32, stderr_excerpt: Option<String> },
    Internal(SupervisorError),
}

const STDERR_EXCERPT_MAX_BYTES: u64 = 4096;

/// Tails up to `STDERR_EXCERPT_MAX_BYTES` from the end of the
/// stderr-mirror file. Best-effort: any read failure just yields `None`
/// rather than masking the child's actual exit code.
fn tail_stderr_excerpt(path: &Path) -> Option<String> {
    let mut file = std::fs::File::open(path).ok()?;
    let len = file.metadata().ok()?.len();
    let start = len.saturating_sub(STDERR_EXCERPT_MAX_BYTES);
    if start > 0 {
        use std::io::Seek;
        file.seek(std::io::SeekFrom::Start(start)).ok()?;
    }
    let mut buf = String::new();
    file.read_to_string(&mut buf).ok()?;
    if buf.is_empty() {
        None
    } else {
        Some(buf)
    }
}

/// Runs `options.argv` to completion, honoring `wait_for_probe`, the
/// command timeout, and the root cancellation context. Fans stdout/stderr
/// out to the parent's own streams, the optional process-log file, and the
/// stderr-mirror file.
pub struct ChildRunner<'a> {
    options: &'a SupervisionOptions,
    health: Arc<SharedHealth>,
    cancel: CancelToken,
    stderr_mirror_path: PathBuf,
}

impl<'a> ChildRunner<'a> {
    pub fn new(
        options: &'a SupervisionOptions,
        health: Arc<SharedHealth>,
        cancel: CancelToken,
        stderr_mirror_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            options,
            health,
            cancel,
            stderr_mirror_path: stderr_mirror_path.into(),
        }
    }

    pub fn run(&self) -> ChildOutcome {
        if self.options.wait_for_probe {
            tracing::info!("waiting for first health probe before starting child");
            if !self.health.gate().wait(&self.cancel) {
                return ChildOutcome::Internal(SupervisorError::TimedOut {
                    elapsed: Duration::default(),
                });
            }
        }

        let (cmd, args) = match self.options.argv.split_first() {
            Some((cmd, args)) => (cmd, args),
            None => return ChildOutcome::Internal(SupervisorError::MissingCommand),
        };

        let process_log = match open_log(self.options.process_log_path.as_deref()) {
            Ok(f) => f,
            Err(e) => return ChildOutcome::Internal(SupervisorError::Process(e)),
        };
        let stderr_mirror = match open_log(Some(&self.stderr_mirror_path)) {
            Ok(Some(f)) => f,
            Ok(None) => unreachable!("stderr mirror path is always Some"),
            Err(e) => return ChildOutcome::Internal(SupervisorError::Process(e)),
        };

        let mut command = Command::new(cmd);
        command
            .args(args)
            .env("IMAGETEST", "true")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        attach::contain(&mut command);

        let start = Instant::now();
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ChildOutcome::Internal(SupervisorError::Process(ProcessError::Spawn {
                    source: e,
                }));
            }
        };

        self.health.update(
            crate::health::HealthState::Running,
            "child process running",
            0,
        );

        let child_stdout = child.stdout.take();
        let child_stderr = child.stderr.take();

        let stdout_thread = child_stdout.map(|pipe| {
            let log = process_log.clone();
            std::thread::spawn(move || tee(pipe, std::io::stdout(), log, None))
        });

        let stderr_mirror = Arc::new(std::sync::Mutex::new(stderr_mirror));
        let stderr_thread = child_stderr.map(|pipe| {
            let log = process_log.clone();
            let mirror = stderr_mirror.clone();
            std::thread::spawn(move || tee(pipe, std::io::stderr(), log, Some(mirror)))
        });

        let outcome = self.wait_for_child(&mut child, start);

        if let Some(t) = stdout_thread {
            let _ = t.join();
        }
        if let Some(t) = stderr_thread {
            let _ = t.join();
        }

        // The tee threads have finished writing by now, so the mirror file
        // reflects everything the child printed to stderr.
        match outcome {
            ChildOutcome::Exited { code, .. } if code != 0 => ChildOutcome::Exited {
                code,
                stderr_excerpt: tail_stderr_excerpt(&self.stderr_mirror_path),
            },
            other => other,
        }
    }

    fn wait_for_child(&self, child: &mut Child, start: Instant) -> ChildOutcome {
        let poll = poll_interval();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    return match status.code() {
                        Some(code) => ChildOutcome::Exited { code, stderr_excerpt: None },
                        None => ChildOutcome::Internal(SupervisorError::Process(
                            ProcessError::CommandFailed {
                                action: "determine exit code",
                                source: std::io::Error::new(
                                    std::io::ErrorKind::Other,
                                    "child terminated by signal",
                                ),
                            },
                        )),
                    };
                }
                Ok(None) => {}
                Err(e) => {
                    return ChildOutcome::Internal(SupervisorError::Process(
                        ProcessError::CommandFailed {
                            action: "wait for child",
                            source: e,
                        },
                    ));
                }
            }

            let timed_out = start.elapsed() >= self.options.command_timeout;
            let cancelled = self.cancel.is_cancelled();
            if timed_out || cancelled {
                return self.escalate(child, start);
            }

            self.cancel.wait_timeout(poll);
        }
    }

    /// Context cancelled (timeout or signal): SIGINT, wait up to
    /// `grace_period`, then SIGKILL. If the child survives even SIGKILL,
    /// that is reported distinctly from a plain timeout/cancel, since it
    /// means a process is still running that the supervisor could not
    /// actually stop.
    fn escalate(&self, child: &mut Child, start: Instant) -> ChildOutcome {
        let pid = child.id();
        tracing::warn!(pid, "sending SIGINT to child");
        if let Err(e) = super::terminate(pid) {
            tracing::error!(pid, error = %e, "failed to send SIGINT");
        }

        match child.wait_timeout(self.options.grace_period) {
            Ok(Some(status)) => {
                tracing::info!(pid, ?status, "child exited gracefully after SIGINT");
            }
            Ok(None) => {
                tracing::warn!(pid, "grace period elapsed; sending SIGKILL");
                if let Err(e) = super::force_kill(pid) {
                    tracing::error!(pid, error = %e, "failed to send SIGKILL");
                }
                let reaped = matches!(child.wait_timeout(Duration::from_secs(2)), Ok(Some(_)));
                if !reaped && super::pid_alive(pid) {
                    tracing::error!(pid, "child still alive after SIGKILL");
                    return ChildOutcome::Internal(SupervisorError::Process(
                        ProcessError::TerminationTimeout {
                            operation: "SIGKILL",
                            elapsed: start.elapsed(),
                        },
                    ));
                }
            }
            Err(e) => {
                tracing::error!(pid, error = %e, "error waiting for child after SIGINT");
            }
        }

        ChildOutcome::Internal(SupervisorError::TimedOut {
            elapsed: start.elapsed(),
        })
    }
}

fn open_log(path: Option<&Path>) -> Result<Option<Arc<std::sync::Mutex<std::fs::File>>>, ProcessError> {
    let Some(path) = path else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| ProcessError::CommandFailed {
                action: "create process-log directory",
                source: e,
            })?;
        }
    }
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .map_err(|e| ProcessError::CommandFailed {
            action: "open process-log file",
            source: e,
        })?;
    Ok(Some(Arc::new(std::sync::Mutex::new(file))))
}

/// Copies bytes from `source` into the parent's own stream, the optional
/// process-log file, and (for stderr) the stderr-mirror file. Each sink
/// write failure is only logged; the fan-out keeps going regardless.
fn tee<R: Read, W: Write>(
    mut source: R,
    mut parent_stream: W,
    process_log: Option<Arc<std::sync::Mutex<std::fs::File>>>,
    mirror: Option<Arc<std::sync::Mutex<std::fs::File>>>,
) {
    let mut buf = [0u8; 8192];
    loop {
        let n = match source.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => n,
            Err(_) => return,
        };
        let chunk = &buf[..n];

        if let Err(e) = parent_stream.write_all(chunk) {
            tracing::warn!(error = %e, "failed to write to parent stream");
        }
        if let Some(log) = &process_log {
            if let Ok(mut f) = log.lock() {
                if let Err(e) = f.write_all(chunk) {
                    tracing::warn!(error = %e, "failed to write to process-log file");
                }
            }
        }
        if let Some(mirror) = &mirror {
            if let Ok(mut f) = mirror.lock() {
                if let Err(e) = f.write_all(chunk) {
                    tracing::warn!(error = %e, "failed to write to stderr-mirror file");
                }
            }
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
mod attach {
    use nix::sys::{prctl::set_pdeathsig, signal::Signal};
    use nix::unistd::{setpgid, Pid};
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    /// New process group so the whole child tree can be signalled at once,
    /// plus a parent-death signal so an abrupt supervisor exit doesn't
    /// orphan the child.
    pub fn contain(cmd: &mut Command) {
        unsafe {
            cmd.pre_exec(|| {
                setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
                set_pdeathsig(Some(Signal::SIGTERM))?;
                Ok(())
            });
        }
    }
}

#[cfg(target_os = "macos")]
mod attach {
    use nix::unistd::{setpgid, Pid};
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    /// macOS has no `PR_SET_PDEATHSIG`; a new process group is still
    /// enough to let the runner's SIGINT/SIGKILL escalation reach the
    /// whole child tree.
    pub fn contain(cmd: &mut Command) {
        unsafe {
            cmd.pre_exec(|| {
                setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(|e| std::io::Error::from_raw_os_error(e as i32))
            });
        }
    }
}
