//! The subprocess `AgentRunner` variant: wraps an external CLI agent binary.

use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::time::Duration;

use crate::{RunnerError, RunnerOptions, StreamEvent};

/// Drives an external CLI binary (e.g. the `--cli` flag path of `run`, §6),
/// one line of newline-delimited JSON per [`StreamEvent`] on stdout.
pub struct SubprocessRunner {
    binary: String,
    child: Option<Child>,
    rx: Option<Receiver<StreamEvent>>,
    timeout: Duration,
}

impl SubprocessRunner {
    /// Build a runner that will invoke `binary` (found on `PATH`) on `start`.
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            child: None,
            rx: None,
            timeout: Duration::from_secs(600),
        }
    }

    pub(crate) fn start(&mut self, prompt: &str, options: RunnerOptions) -> Result<(), RunnerError> {
        if self.child.is_some() {
            return Err(RunnerError::AlreadyStarted);
        }
        self.timeout = options.timeout;

        let mut child = Command::new(&self.binary)
            .arg("--print")
            .arg("--output-format")
            .arg("stream-json")
            .arg("--model")
            .arg(&options.model)
            .arg(prompt)
            .current_dir(&options.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().expect("piped stdout");
        let (tx, rx) = mpsc::channel();
        std::thread::spawn(move || {
            let reader = BufReader::new(stdout);
            for line in reader.lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<StreamEvent>(&line) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, line, "could not decode agent stream line");
                    }
                }
            }
        });

        self.child = Some(child);
        self.rx = Some(rx);
        Ok(())
    }

    pub(crate) fn events(&mut self) -> Result<Vec<StreamEvent>, RunnerError> {
        let rx = self.rx.as_ref().ok_or(RunnerError::NotStarted)?;
        let mut events = Vec::new();
        while let Ok(event) = rx.recv_timeout(self.timeout) {
            events.push(event);
        }
        Ok(events)
    }

    pub(crate) fn wait(&mut self) -> Result<(), RunnerError> {
        let child = self.child.as_mut().ok_or(RunnerError::NotStarted)?;
        let status = child.wait()?;
        if status.success() {
            Ok(())
        } else {
            Err(RunnerError::Io(std::io::Error::other(format!(
                "agent process exited with status {status}"
            ))))
        }
    }

    pub(crate) fn kill(&mut self) {
        if let Some(child) = self.child.as_mut() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
