//! Encoder process handle
//!
//! ## Responsibilities
//!
//! - Spawn the external encoder detached with captured stderr
//! - Liveness checks, graceful terminate, forced kill, bounded waits
//! - Keep a tail of stderr output for failure diagnostics

use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use crate::error::{Error, Result};

/// Maximum stderr bytes retained for diagnostics.
const STDERR_TAIL_LIMIT: usize = 8 * 1024;

/// One spawned encoder process. `kill_on_drop` guarantees no orphan
/// survives a dropped handle.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: Option<u32>,
    stderr_tail: Arc<Mutex<String>>,
}

impl ProcessHandle {
    pub fn spawn(program: &Path, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::EncoderSpawn(format!("{}: {}", program.display(), e)))?;

        let stderr_tail = Arc::new(Mutex::new(String::new()));
        if let Some(stderr) = child.stderr.take() {
            let tail = stderr_tail.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let mut buf = tail.lock().unwrap_or_else(|e| e.into_inner());
                    buf.push_str(&line);
                    buf.push('\n');
                    if buf.len() > STDERR_TAIL_LIMIT {
                        let cut = buf.len() - STDERR_TAIL_LIMIT;
                        // Trim from the front, keeping the newest output.
                        let boundary = buf
                            .char_indices()
                            .map(|(i, _)| i)
                            .find(|&i| i >= cut)
                            .unwrap_or(0);
                        buf.drain(..boundary);
                    }
                }
            });
        }

        let pid = child.id();
        Ok(Self {
            child,
            pid,
            stderr_tail,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness probe.
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Ask the process to exit gracefully (SIGTERM on unix). Falls
    /// back to a kill request where no softer signal exists.
    pub fn terminate(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                unsafe {
                    libc::kill(pid as libc::pid_t, libc::SIGTERM);
                }
                return;
            }
        }
        let _ = self.child.start_kill();
    }

    pub fn kill(&mut self) {
        let _ = self.child.start_kill();
    }

    /// Wait for exit up to `timeout`. Returns true when the process
    /// exited within the window.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.child.wait()).await.is_ok()
    }

    /// Newest retained stderr output, trimmed.
    pub fn stderr_tail(&self) -> String {
        self.stderr_tail
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .trim()
            .to_string()
    }
}
