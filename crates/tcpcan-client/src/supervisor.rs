//! Running the client as a separate process
//!
//! The forwarding loops are latency sensitive, so a host application can
//! start `tcpcand client` as a child process instead of sharing its own
//! runtime with them. [`ClientProcess`] owns that child.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::ClientError;

/// Handle to a client running in a child process
///
/// The child is killed if the handle is dropped while it is still running.
#[derive(Debug)]
pub struct ClientProcess {
    child: Child,
    pid: Option<u32>,
}

impl ClientProcess {
    /// Start `program` with the arguments produced by [`ClientConfig::to_args`]
    pub fn start(program: impl AsRef<OsStr>, config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let mut command = Command::new(program);
        command.args(config.to_args());
        Self::spawn(command)
    }

    /// Start an arbitrary command as the client process
    pub fn spawn(mut command: Command) -> Result<Self, ClientError> {
        let child = command
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ClientError::Process(format!("Failed to start client: {}", e)))?;
        let pid = child.id();
        info!(?pid, "Client process started");
        Ok(Self { child, pid })
    }

    /// OS process id, as recorded at start
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Wait for the process to exit
    ///
    /// Returns `None` if it is still running after `timeout`.
    pub async fn join(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, ClientError> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(pid = ?self.pid, %status, "Client process exited");
                Ok(Some(status))
            }
            Err(_) => Ok(None),
        }
    }

    /// Ask the process to stop and wait up to `timeout` for it to exit
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, ClientError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(Some(status));
        }
        self.terminate()?;
        let status = self.join(timeout).await?;
        if status.is_none() {
            warn!(pid = ?self.pid, "Client process ignored SIGTERM");
        }
        Ok(status)
    }

    /// Kill the process and wait up to `timeout` for it to be reaped
    pub async fn kill(&mut self, timeout: Duration) -> Result<Option<ExitStatus>, ClientError> {
        if let Some(status) = self.child.try_wait()? {
            return Ok(Some(status));
        }
        self.child.start_kill()?;
        self.join(timeout).await
    }

    #[cfg(unix)]
    fn terminate(&mut self) -> Result<(), ClientError> {
        let Some(pid) = self.pid else {
            return Ok(());
        };
        let pid = i32::try_from(pid)
            .map_err(|_| ClientError::Process(format!("pid {} out of range", pid)))?;
        // SAFETY: pid belongs to a child this handle has not reaped yet
        let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    fn terminate(&mut self) -> Result<(), ClientError> {
        Ok(self.child.start_kill()?)
    }
}
