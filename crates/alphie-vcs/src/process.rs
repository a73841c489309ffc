//! Subprocess execution with an enforced timeout, and the error type every
//! [`crate::Vcs`] method returns.

use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use thiserror::Error;

/// Error returned by every `alphie-vcs` operation.
///
/// Carries the failing git invocation and its stderr so a caller (or the
/// engine's [`EngineError`](../../alphie_engine/error/enum.EngineError.html))
/// can render an actionable message without this crate leaking process
/// abstractions upward.
#[derive(Debug, Error)]
pub enum VcsError {
    /// `git <subcommand>` exited non-zero.
    #[error("git {subcommand} failed (exit {exit_code:?}): {stderr}")]
    CommandFailed {
        /// The git subcommand invoked, e.g. `"worktree add"`.
        subcommand: &'static str,
        /// Process exit code, `None` if killed by a signal.
        exit_code: Option<i32>,
        /// Captured stderr.
        stderr: String,
    },
    /// The command did not finish within its timeout and was killed.
    #[error("git {subcommand} timed out after {timeout:?}")]
    Timeout {
        /// The git subcommand invoked.
        subcommand: &'static str,
        /// The timeout that was exceeded.
        timeout: Duration,
    },
    /// The `git` binary could not be spawned or its output could not be read.
    #[error("git {subcommand}: {source}")]
    Io {
        /// The git subcommand invoked.
        subcommand: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// Output that was expected to be UTF-8 (a path, a ref name) was not.
    #[error("git {subcommand}: output was not valid UTF-8")]
    InvalidUtf8 {
        /// The git subcommand invoked.
        subcommand: &'static str,
    },
}

impl VcsError {
    /// The git subcommand this error concerns, for error-message
    /// composition one layer up.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::CommandFailed { subcommand, .. }
            | Self::Timeout { subcommand, .. }
            | Self::Io { subcommand, .. }
            | Self::InvalidUtf8 { subcommand } => subcommand,
        }
    }
}

/// Run `git <args>` in `cwd`, killing it if it exceeds `timeout`.
///
/// `subcommand` is a short label (e.g. `"worktree add"`) used purely for
/// diagnostics; it need not match `args` exactly.
pub(crate) fn git(
    cwd: &Path,
    args: &[&str],
    timeout: Duration,
    subcommand: &'static str,
) -> Result<String, VcsError> {
    tracing::debug!(?args, cwd = %cwd.display(), "running git");

    let mut child = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| VcsError::Io { subcommand, source })?;

    let mut stdout = child.stdout.take().expect("piped stdout");
    let mut stderr = child.stderr.take().expect("piped stderr");

    let (tx, rx) = mpsc::channel();
    let waiter = std::thread::spawn(move || {
        use std::io::Read;
        let mut out = String::new();
        let mut err = String::new();
        let _ = stdout.read_to_string(&mut out);
        let _ = stderr.read_to_string(&mut err);
        let status = child.wait();
        let _ = tx.send((status, out, err));
    });

    match rx.recv_timeout(timeout) {
        Ok((status, stdout, stderr)) => {
            let _ = waiter.join();
            let status = status.map_err(|source| VcsError::Io { subcommand, source })?;
            if status.success() {
                Ok(stdout)
            } else {
                Err(VcsError::CommandFailed {
                    subcommand,
                    exit_code: status.code(),
                    stderr,
                })
            }
        }
        Err(mpsc::RecvTimeoutError::Timeout) => Err(VcsError::Timeout {
            subcommand,
            timeout,
        }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(VcsError::Io {
            subcommand,
            source: io::Error::other("git process thread disconnected"),
        }),
    }
}
