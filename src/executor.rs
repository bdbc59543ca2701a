//! External VCS client execution.
//!
//! [`Executor`] runs one command with captured output and an optional
//! deadline. [`CommandEnv`] is shared by every repository created from one
//! [`crate::HistoryGuru`]: it resolves the executable for each
//! [`RepositoryKind`] and remembers, once per kind, whether that client works.

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::HistoryConfig;
use crate::error::HistoryError;
use crate::repository::RepositoryKind;

/// Interval between liveness checks while a deadline is armed.
const WAIT_SLICE: Duration = Duration::from_millis(20);

/// Deadline for the "is the client usable" probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Executor ───────────────────────────────────────────────────────

/// Captured result of one finished command.
#[derive(Debug)]
pub struct ExecOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: String,
}

/// One external command: program, fixed argument vector and working directory.
#[derive(Clone, Debug)]
pub struct Executor {
    program: String,
    args: Vec<String>,
    cwd: PathBuf,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl Executor {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Executor {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
            timeout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    /// Run to completion. A non-zero exit is not an error here.
    pub fn run(&self) -> Result<ExecOutput, HistoryError> {
        let start = Instant::now();
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .current_dir(&self.cwd)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a timeout also reaches helpers such as ssh.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut child = command.spawn().map_err(|source| HistoryError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        // Both pipes are drained on their own threads so a chatty stderr
        // cannot stall the child while we wait on stdout.
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        // On error the readers are detached, not joined: a surviving
        // grandchild may still hold the pipes open.
        let status = self.wait(&mut child)?;

        let stdout = join_output(stdout)?;
        let stderr = String::from_utf8_lossy(&join_output(stderr)?).into_owned();
        if !stderr.trim().is_empty() {
            debug!(program = %self.program, stderr = %stderr.trim(), "Command wrote to stderr");
        }
        debug!(
            program = %self.program,
            args = ?self.args,
            cwd = %self.cwd.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Command finished"
        );
        Ok(ExecOutput {
            status,
            stdout,
            stderr,
        })
    }

    /// Run and return stdout, mapping a non-zero exit to [`HistoryError::Command`].
    pub fn run_checked(&self) -> Result<Vec<u8>, HistoryError> {
        let output = self.run()?;
        if !output.status.success() {
            return Err(HistoryError::Command {
                program: self.program.clone(),
                args: self.args.clone(),
                status: output.status.to_string(),
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    /// True when the command starts and exits with status 0.
    pub fn succeeds(&self) -> bool {
        self.run().map(|o| o.status.success()).unwrap_or(false)
    }

    fn wait(&self, child: &mut Child) -> Result<ExitStatus, HistoryError> {
        let Some(limit) = self.timeout else {
            return Ok(child.wait()?);
        };
        let deadline = Instant::now() + limit;
        loop {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                kill_process_group(child);
                let _ = child.kill();
                let _ = child.wait();
                return Err(HistoryError::CommandTimeout {
                    program: self.program.clone(),
                    timeout_secs: limit.as_secs(),
                });
            }
            thread::sleep(WAIT_SLICE);
        }
    }
}

/// Kill every process in the child's group; the group id is the child's pid.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    let group = format!("-{}", child.id());
    let killed = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(e) = killed {
        debug!(group = %group, error = %e, "Cannot signal process group");
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> JoinHandle<std::io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            pipe.read_to_end(&mut buf)?;
        }
        Ok(buf)
    })
}

fn join_output(handle: JoinHandle<std::io::Result<Vec<u8>>>) -> Result<Vec<u8>, HistoryError> {
    handle
        .join()
        .map_err(|_| HistoryError::LockPoisoned("output reader thread panicked".to_string()))?
        .map_err(HistoryError::from)
}

// ─── CommandEnv ─────────────────────────────────────────────────────

/// Executable resolution and memoized tool probes, one slot per kind.
#[derive(Debug)]
pub struct CommandEnv {
    overrides: HashMap<String, String>,
    timeout: Option<Duration>,
    working: Vec<OnceLock<bool>>,
    probes: AtomicUsize,
}

impl CommandEnv {
    pub fn new(overrides: HashMap<String, String>, timeout: Option<Duration>) -> Self {
        CommandEnv {
            overrides,
            timeout,
            working: RepositoryKind::ALL.iter().map(|_| OnceLock::new()).collect(),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn from_config(config: &HistoryConfig) -> Self {
        Self::new(config.commands.clone(), config.command_timeout())
    }

    /// Executable for `kind`: the configured override or the default client name.
    pub fn program(&self, kind: RepositoryKind) -> String {
        self.program_named(kind.key(), kind.default_program())
    }

    /// Executable for a helper program (e.g. RCS `co`), overridable by `key`.
    pub fn program_named(&self, key: &str, default: &str) -> String {
        self.overrides
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }

    /// Executor for the main client of `kind`, deadline applied.
    pub fn executor(&self, kind: RepositoryKind, cwd: &Path) -> Executor {
        Executor::new(self.program(kind), cwd).timeout(self.timeout)
    }

    /// Executor for a helper program, deadline applied.
    pub fn helper(&self, key: &str, default: &str, cwd: &Path) -> Executor {
        Executor::new(self.program_named(key, default), cwd).timeout(self.timeout)
    }

    /// Whether the client for `kind` runs. Probed at most once per kind.
    pub fn is_working(&self, kind: RepositoryKind) -> bool {
        *self.working[kind.index()].get_or_init(|| {
            self.probes.fetch_add(1, Ordering::Relaxed);
            let cwd = std::env::temp_dir();
            let ok = Executor::new(self.program(kind), cwd)
                .args(kind.probe_args().iter().copied())
                .timeout(Some(PROBE_TIMEOUT))
                .succeeds();
            if ok {
                debug!(kind = %kind, "Client is available");
            } else {
                info!(kind = %kind, program = %self.program(kind), "Client is not available, history disabled for this kind");
            }
            ok
        })
    }

    /// Probe result without probing: `None` until [`Self::is_working`] ran.
    pub fn working_state(&self, kind: RepositoryKind) -> Option<bool> {
        self.working[kind.index()].get().copied()
    }

    /// Number of probes actually executed.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }
}

impl Default for CommandEnv {
    fn default() -> Self {
        Self::new(HashMap::new(), None)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
