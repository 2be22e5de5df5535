//! External command execution for probes

use super::deadline::ProbeDeadline;
use super::error::{is_exhaustion, FactError};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, trace};

/// Exit code reported for a program that could not be found or executed.
pub const RC_NOT_FOUND: i32 = 127;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub rc: i32,
    pub stdout: String,
    pub stderr: String,
    /// The program was not found or was not executable.
    pub missing: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            rc: 0,
            stdout: stdout.into(),
            stderr: String::new(),
            missing: false,
        }
    }

    pub fn failed(rc: i32, stderr: impl Into<String>) -> Self {
        Self {
            rc,
            stdout: String::new(),
            stderr: stderr.into(),
            missing: false,
        }
    }

    pub fn not_found() -> Self {
        Self {
            rc: RC_NOT_FOUND,
            stdout: String::new(),
            stderr: String::new(),
            missing: true,
        }
    }

    pub fn success(&self) -> bool {
        !self.missing && self.rc == 0
    }

    /// Trimmed stdout when the command succeeded with non-empty output.
    pub fn stdout_if_ok(&self) -> Option<&str> {
        let out = self.stdout.trim();
        (self.success() && !out.is_empty()).then_some(out)
    }
}

/// Runs one external program with fixed arguments.
///
/// Implementations never fail for a missing binary or a non-zero exit; those
/// are reported through [`CommandOutput`]. Errors are reserved for the
/// deadline firing and for the host being unable to spawn at all.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        deadline: &ProbeDeadline,
    ) -> Result<CommandOutput, FactError>;
}

/// [`CommandRunner`] backed by `tokio::process`.
pub struct SystemCommandRunner {
    extra_paths: Vec<PathBuf>,
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self::new(default_extra_paths())
    }
}

pub fn default_extra_paths() -> Vec<PathBuf> {
    [
        "/sbin",
        "/usr/sbin",
        "/usr/local/sbin",
        "/usr/bin",
        "/usr/contrib/bin",
        "/usr/local/bin",
    ]
    .iter()
    .map(PathBuf::from)
    .collect()
}

impl SystemCommandRunner {
    pub fn new(extra_paths: Vec<PathBuf>) -> Self {
        Self { extra_paths }
    }

    fn search_path(&self) -> OsString {
        let mut dirs: Vec<PathBuf> = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        for extra in &self.extra_paths {
            if !dirs.contains(extra) {
                dirs.push(extra.clone());
            }
        }
        std::env::join_paths(dirs).unwrap_or_default()
    }

    /// Binary lookup stats the filesystem, so it runs on the blocking pool.
    async fn resolve(&self, program: &str) -> Option<PathBuf> {
        let program = program.to_string();
        let search_path = self.search_path();
        tokio::task::spawn_blocking(move || {
            if program.contains('/') {
                let path = PathBuf::from(&program);
                return path.is_file().then_some(path);
            }
            let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
            which::which_in(&program, Some(search_path), cwd).ok()
        })
        .await
        .ok()
        .flatten()
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        deadline: &ProbeDeadline,
    ) -> Result<CommandOutput, FactError> {
        if deadline.is_expired() {
            return Err(FactError::Timeout {
                after: deadline.budget(),
            });
        }

        let Some(path) = self.resolve(program).await else {
            trace!(program, "command not found");
            return Ok(CommandOutput::not_found());
        };

        let mut command = Command::new(&path);
        command
            .args(args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Own process group, so background children can be killed with it.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) if is_exhaustion(&e) => {
                return Err(FactError::from_io(format!("spawn {program}"), e));
            }
            Err(e) => {
                debug!(program, error = %e, "command could not be executed");
                return Ok(CommandOutput::not_found());
            }
        };
        let pid = child.id();

        let stdout = tokio::spawn(drain(child.stdout.take()));
        let stderr = tokio::spawn(drain(child.stderr.take()));

        let finished = {
            let collect = async {
                let status = child.wait().await?;
                // Leftover group members would keep the pipes open.
                kill_group(pid);
                let out = stdout.await.map_err(std::io::Error::other)??;
                let err = stderr.await.map_err(std::io::Error::other)??;
                Ok::<_, std::io::Error>((status, out, err))
            };
            tokio::select! {
                res = collect => Some(res),
                _ = deadline.expired() => None,
            }
        };

        match finished {
            Some(Ok((status, out, err))) => {
                let output = CommandOutput {
                    rc: status.code().unwrap_or(-1),
                    stdout: String::from_utf8_lossy(&out).into_owned(),
                    stderr: String::from_utf8_lossy(&err).into_owned(),
                    missing: false,
                };
                trace!(program, ?args, rc = output.rc, "command finished");
                Ok(output)
            }
            Some(Err(e)) => Err(FactError::from_io(format!("wait for {program}"), e)),
            None => {
                kill_group(pid);
                // kill() also reaps, so nothing is left in the process table.
                if let Err(e) = child.kill().await {
                    debug!(program, error = %e, "failed to kill timed out command");
                }
                debug!(program, ?args, "command group killed at probe deadline");
                Err(FactError::Timeout {
                    after: deadline.budget(),
                })
            }
        }
    }
}

/// SIGKILLs the process group led by `pid`. A group that is already gone is
/// not an error.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        if e != nix::errno::Errno::ESRCH {
            debug!(pid, error = %e, "failed to signal process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

async fn drain<R: AsyncRead + Unpin>(pipe: Option<R>) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    #[tokio::test]
    async fn test_missing_binary_is_not_an_error() {
        let runner = SystemCommandRunner::default();
        let deadline = ProbeDeadline::new(Duration::from_secs(5));
        let output = runner
            .run("definitely-not-a-real-binary-xyz", &[], &deadline)
            .await
            .unwrap();
        assert!(output.missing);
        assert_eq!(output.rc, RC_NOT_FOUND);
        assert!(!output.success());
    }

    #[tokio::test]
    async fn test_captures_stdout_and_exit_code() {
        let runner = SystemCommandRunner::default();
        let deadline = ProbeDeadline::new(Duration::from_secs(5));
        let output = runner
            .run("sh", &["-c", "echo hello; exit 3"], &deadline)
            .await
            .unwrap();
        assert_eq!(output.rc, 3);
        assert_eq!(output.stdout.trim(), "hello");
        assert!(!output.missing);
    }

    #[tokio::test]
    async fn test_background_child_does_not_hold_output() {
        let runner = SystemCommandRunner::default();
        let deadline = ProbeDeadline::new(Duration::from_secs(10));
        let started = Instant::now();
        let output = runner
            .run("sh", &["-c", "sleep 30 & echo started"], &deadline)
            .await
            .unwrap();
        assert_eq!(output.stdout.trim(), "started");
        assert!(output.success());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_deadline_kills_whole_group() {
        let runner = SystemCommandRunner::default();
        let deadline = ProbeDeadline::new(Duration::from_millis(200));
        let started = Instant::now();
        let result = runner
            .run("sh", &["-c", "sleep 30 & sleep 30; wait"], &deadline)
            .await;
        assert!(matches!(result, Err(FactError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_absolute_path_is_resolved() {
        let runner = SystemCommandRunner::new(Vec::new());
        let deadline = ProbeDeadline::new(Duration::from_secs(5));
        let output = runner.run("/bin/sh", &["-c", "exit 0"], &deadline).await.unwrap();
        assert!(output.success());
        let missing = runner
            .run("/nonexistent/bin/tool", &[], &deadline)
            .await
            .unwrap();
        assert!(missing.missing);
    }

    #[tokio::test]
    async fn test_deadline_kills_child() {
        let runner = SystemCommandRunner::default();
        let deadline = ProbeDeadline::new(Duration::from_millis(200));
        let started = Instant::now();
        let result = runner.run("sleep", &["30"], &deadline).await;
        assert!(matches!(result, Err(FactError::Timeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
