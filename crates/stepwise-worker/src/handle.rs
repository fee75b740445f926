use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::WorkerError;
use crate::protocol::{Command, Reply};
use crate::worker::{Inbound, Worker};

const COMMAND_BUFFER: usize = 32;

/// A worker running on a tokio task, driven through its two channels.
///
/// # Usage
///
/// ```ignore
/// let mut handle = WorkerHandle::spawn(Worker::new(runtime, WorkerConfig::default()));
/// let replies = handle.request(Command::Ping).await?;
/// handle.request(Command::Shutdown).await?;
/// handle.join().await?;
/// ```
pub struct WorkerHandle {
  commands: mpsc::Sender<Inbound>,
  replies: mpsc::UnboundedReceiver<Reply>,
  task: JoinHandle<Result<(), WorkerError>>,
}

impl WorkerHandle {
  pub fn spawn(worker: Worker) -> Self {
    let (commands, command_rx) = mpsc::channel(COMMAND_BUFFER);
    let (reply_tx, replies) = mpsc::unbounded_channel();
    let task = tokio::spawn(worker.serve(command_rx, reply_tx));
    Self {
      commands,
      replies,
      task,
    }
  }

  pub async fn send(&self, command: Command) -> Result<(), WorkerError> {
    self
      .commands
      .send(Ok(command))
      .await
      .map_err(|_| WorkerError::Closed)
  }

  /// Next reply, or `None` once the worker has stopped.
  pub async fn recv(&mut self) -> Option<Reply> {
    self.replies.recv().await
  }

  /// Send a command and collect its replies up to and including the final one.
  pub async fn request(&mut self, command: Command) -> Result<Vec<Reply>, WorkerError> {
    self.send(command.clone()).await?;

    let mut replies = Vec::new();
    loop {
      let reply = self.recv().await.ok_or(WorkerError::Closed)?;
      let done = command.completes_with(&reply);
      replies.push(reply);
      if done {
        return Ok(replies);
      }
    }
  }

  /// Close the command channel and wait for the worker to stop.
  pub async fn join(self) -> Result<(), WorkerError> {
    drop(self.commands);
    match self.task.await {
      Ok(result) => result,
      Err(e) => Err(WorkerError::Crashed {
        message: e.to_string(),
      }),
    }
  }
}
