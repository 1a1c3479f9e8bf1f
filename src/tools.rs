//! External enrichment tools.
//!
//! The vendor's reparse and clean executables derive extra channel files
//! (heart rate, cleaned EEG) next to the raw ones. The pipeline only sees
//! the [`ToolRunner`] capability and treats every outcome other than
//! `Completed` the same way: log it and carry on with the files present.

use std::fmt;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::ToolsConfig;

/// Interval between checks on a running tool
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalTool {
    /// Derives heart-rate channels
    Reparse,
    /// Derives cleaned EEG channels
    Clean,
}

impl ExternalTool {
    /// Order in which enrichment runs.
    pub const ALL: [ExternalTool; 2] = [ExternalTool::Reparse, ExternalTool::Clean];
}

impl fmt::Display for ExternalTool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExternalTool::Reparse => f.write_str("reparse"),
            ExternalTool::Clean => f.write_str("clean"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Completed,
    /// Exited unsuccessfully; `None` when killed by a signal
    Failed { code: Option<i32> },
    /// Killed after running past the timeout
    TimedOut,
    /// Not configured or could not be started
    Unavailable(String),
}

/// Runs an external tool over a set of channel files.
pub trait ToolRunner {
    fn invoke(&self, tool: ExternalTool, files: &[PathBuf], timeout: Duration) -> ToolOutcome;
}

/// No enrichment: every tool is unavailable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTools;

impl ToolRunner for NoTools {
    fn invoke(&self, tool: ExternalTool, _files: &[PathBuf], _timeout: Duration) -> ToolOutcome {
        ToolOutcome::Unavailable(format!("no {} tool configured", tool))
    }
}

/// Runs configured executables as child processes.
///
/// The files are passed as arguments; the process runs in the directory
/// of the first file. Output is discarded.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    reparse: Option<PathBuf>,
    clean: Option<PathBuf>,
}

impl ProcessRunner {
    pub fn new(reparse: Option<PathBuf>, clean: Option<PathBuf>) -> Self {
        Self { reparse, clean }
    }

    pub fn from_config(config: &ToolsConfig) -> Self {
        Self::new(config.reparse.clone(), config.clean.clone())
    }

    fn executable(&self, tool: ExternalTool) -> Option<&PathBuf> {
        match tool {
            ExternalTool::Reparse => self.reparse.as_ref(),
            ExternalTool::Clean => self.clean.as_ref(),
        }
    }
}

impl ToolRunner for ProcessRunner {
    fn invoke(&self, tool: ExternalTool, files: &[PathBuf], timeout: Duration) -> ToolOutcome {
        let Some(executable) = self.executable(tool) else {
            return ToolOutcome::Unavailable(format!("no {} tool configured", tool));
        };

        let mut command = Command::new(executable);
        command
            .args(files)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        let dir = files.first().and_then(|f| f.parent());
        if let Some(dir) = dir.filter(|d| !d.as_os_str().is_empty()) {
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ToolOutcome::Unavailable(format!(
                    "cannot start '{}': {}",
                    executable.display(),
                    e
                ))
            }
        };

        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) if status.success() => {
                    debug!("{} finished in {:.2?}", tool, started.elapsed());
                    return ToolOutcome::Completed;
                }
                Ok(Some(status)) => return ToolOutcome::Failed { code: status.code() },
                Ok(None) if started.elapsed() >= timeout => {
                    // the process may exit between the check and the kill
                    let _ = child.kill();
                    let _ = child.wait();
                    return ToolOutcome::TimedOut;
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return ToolOutcome::Unavailable(e.to_string());
                }
            }
        }
    }
}
