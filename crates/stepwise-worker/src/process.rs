//! Driver side of a worker running as a child process.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use tracing::{debug, info, warn};

use crate::error::WorkerError;
use crate::protocol::{Command, Reply};
use crate::stdio::codec_error;

/// How to start a worker process and how long to wait for it.
#[derive(Debug, Clone)]
pub struct ProcessConfig {
  pub program: PathBuf,
  pub args: Vec<String>,
  /// Longest wait for any single reply.
  pub result_timeout: Duration,
  /// Wait after a `shutdown` command before escalating.
  pub shutdown_timeout: Duration,
  /// Wait after `SIGTERM` before killing the process.
  pub terminate_timeout: Duration,
}

impl ProcessConfig {
  pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
    Self {
      program: program.into(),
      args,
      result_timeout: Duration::from_secs(300),
      shutdown_timeout: Duration::from_secs(10),
      terminate_timeout: Duration::from_secs(5),
    }
  }
}

/// A worker child process speaking the JSON-lines protocol.
///
/// Cancellation is coarse: a worker that stops answering is terminated, never
/// asked to abandon the step in progress.
pub struct WorkerProcess {
  child: Child,
  stdin: Option<FramedWrite<ChildStdin, LinesCodec>>,
  stdout: FramedRead<ChildStdout, LinesCodec>,
  config: ProcessConfig,
}

impl WorkerProcess {
  pub fn spawn(config: ProcessConfig) -> Result<Self, WorkerError> {
    info!(program = %config.program.display(), "starting worker process");
    let mut child = tokio::process::Command::new(&config.program)
      .args(&config.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()
      .map_err(WorkerError::Spawn)?;

    let stdin = child.stdin.take().ok_or(WorkerError::Closed)?;
    let stdout = child.stdout.take().ok_or(WorkerError::Closed)?;

    Ok(Self {
      child,
      stdin: Some(FramedWrite::new(stdin, LinesCodec::new())),
      stdout: FramedRead::new(stdout, LinesCodec::new()),
      config,
    })
  }

  pub fn id(&self) -> Option<u32> {
    self.child.id()
  }

  /// Whether the process is still running.
  pub fn is_alive(&mut self) -> bool {
    matches!(self.child.try_wait(), Ok(None))
  }

  pub async fn send(&mut self, command: &Command) -> Result<(), WorkerError> {
    let stdin = self.stdin.as_mut().ok_or(WorkerError::Closed)?;
    let line = serde_json::to_string(command)?;
    stdin.send(line).await.map_err(codec_error)
  }

  /// Next reply, waiting at most the configured result timeout.
  pub async fn recv(&mut self) -> Result<Reply, WorkerError> {
    let wait = self.config.result_timeout;
    let line = timeout(wait, self.stdout.next())
      .await
      .map_err(|_| WorkerError::Timeout {
        secs: wait.as_secs(),
      })?
      .ok_or(WorkerError::Closed)?
      .map_err(codec_error)?;
    Ok(serde_json::from_str(&line)?)
  }

  /// Send a command and read replies until its final one, which is returned.
  ///
  /// Every earlier reply is passed to `on_reply` in arrival order.
  pub async fn request(
    &mut self,
    command: Command,
    mut on_reply: impl FnMut(&Reply),
  ) -> Result<Reply, WorkerError> {
    self.send(&command).await?;
    loop {
      let reply = self.recv().await?;
      if command.completes_with(&reply) {
        return Ok(reply);
      }
      on_reply(&reply);
    }
  }

  /// Stop the worker, escalating until it exits.
  ///
  /// 1. send `shutdown` and wait for the shutdown timeout
  /// 2. close the worker's input, send `SIGTERM` and wait for the terminate
  ///    timeout
  /// 3. kill the process
  pub async fn terminate(&mut self) -> Result<ExitStatus, WorkerError> {
    if let Ok(Some(status)) = self.child.try_wait() {
      return Ok(status);
    }

    if self.send(&Command::Shutdown).await.is_ok() {
      if let Some(status) = self.wait_for(self.config.shutdown_timeout).await {
        info!(%status, "worker shut down");
        return Ok(status);
      }
      warn!("worker ignored shutdown, terminating it");
    }

    self.stdin = None;
    self.signal_terminate();
    if let Some(status) = self.wait_for(self.config.terminate_timeout).await {
      info!(%status, "worker terminated");
      return Ok(status);
    }

    warn!("worker still running, killing it");
    self.child.kill().await?;
    Ok(self.child.wait().await?)
  }

  #[cfg(unix)]
  fn signal_terminate(&self) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Some(pid) = self.child.id().and_then(|id| i32::try_from(id).ok()) else {
      return;
    };
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
      warn!(pid, error = %e, "failed to send SIGTERM to worker");
    }
  }

  // Closing stdin is the only terminate request available here.
  #[cfg(not(unix))]
  fn signal_terminate(&self) {}

  async fn wait_for(&mut self, wait: Duration) -> Option<ExitStatus> {
    match timeout(wait, self.child.wait()).await {
      Ok(Ok(status)) => Some(status),
      Ok(Err(e)) => {
        debug!(error = %e, "failed to wait for worker");
        None
      }
      Err(_) => None,
    }
  }
}
