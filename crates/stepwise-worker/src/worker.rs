//! The persistent worker.
//!
//! A [`Worker`] processes one [`Command`] at a time and streams [`Reply`]
//! messages back in order. It keeps the last loaded workflow document and its
//! resource cache between commands, so a document executed repeatedly builds
//! its resources once.
//!
//! State transitions:
//!
//! ```text
//! Idle -> Loading -> Executing -> Idle
//!   \-> ShutDown (shutdown command or closed command channel)
//!   \-> Crashed  (panic outside the per-command error handling)
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::ControlFlow;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use stepwise_runtime::{
  ActionRuntime, Orchestrator, ReleaseLevel, RuntimeConfig, RuntimeError, WorkflowDocument,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{WorkerError, error_trace};
use crate::protocol::{CacheInfo, Command, Reply};
use crate::session::{Session, content_hash};

/// Default threshold for the memory growth warning: 500 MiB.
pub const DEFAULT_MEMORY_GROWTH_WARNING_BYTES: u64 = 500 * 1024 * 1024;

/// Applies a log level requested by an `execute` command.
pub type LogLevelHook = Arc<dyn Fn(&str) + Send + Sync>;

/// One item on the command queue: a command, or the reason a transport could
/// not read one. Rejections travel the same queue so their `error` replies
/// stay in order with the replies to earlier commands.
pub type Inbound = Result<Command, WorkerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Idle,
  Loading,
  Executing,
  ShutDown,
  Crashed,
}

/// Configuration for a [`Worker`].
#[derive(Clone)]
pub struct WorkerConfig {
  pub runtime: RuntimeConfig,
  /// Warn when allocated device memory grows by more than this between runs.
  pub memory_growth_warning_bytes: u64,
  pub log_level_hook: Option<LogLevelHook>,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      runtime: RuntimeConfig::default(),
      memory_growth_warning_bytes: DEFAULT_MEMORY_GROWTH_WARNING_BYTES,
      log_level_hook: None,
    }
  }
}

impl fmt::Debug for WorkerConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerConfig")
      .field("runtime", &self.runtime)
      .field("memory_growth_warning_bytes", &self.memory_growth_warning_bytes)
      .field("log_level_hook", &self.log_level_hook.is_some())
      .finish()
  }
}

/// Long-lived command processor that owns the resource cache.
pub struct Worker {
  orchestrator: Orchestrator,
  session: Session,
  state: WorkerState,
  config: WorkerConfig,
}

impl Worker {
  pub fn new(runtime: Arc<dyn ActionRuntime>, config: WorkerConfig) -> Self {
    Self::with_orchestrator(Orchestrator::new(runtime, config.runtime.clone()), config)
  }

  /// Create a worker around a preconfigured orchestrator.
  pub fn with_orchestrator(orchestrator: Orchestrator, config: WorkerConfig) -> Self {
    info!("worker initialized");
    Self {
      orchestrator,
      session: Session::new(),
      state: WorkerState::Idle,
      config,
    }
  }

  pub fn state(&self) -> WorkerState {
    self.state
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  /// Process commands until `shutdown` or until the command channel closes.
  ///
  /// Command failures and rejected input are reported as [`Reply::Error`] and
  /// processing continues. A panic is reported as [`Reply::Crashed`] and ends
  /// the loop with an error.
  pub async fn serve(
    mut self,
    mut commands: mpsc::Receiver<Inbound>,
    replies: mpsc::UnboundedSender<Reply>,
  ) -> Result<(), WorkerError> {
    info!("worker entering command loop");

    loop {
      let Some(inbound) = commands.recv().await else {
        info!("command channel closed");
        self.full_cleanup();
        break;
      };

      let command = match inbound {
        Ok(command) => command,
        Err(e) => {
          warn!(error = %e, "rejecting command");
          emit(
            &replies,
            Reply::Error {
              message: format!("invalid command: {e}"),
              trace: error_trace(&e),
            },
          );
          continue;
        }
      };

      let label = command_label(&command);
      debug!(command = %label, "received command");

      let outcome = AssertUnwindSafe(self.handle(command, &replies))
        .catch_unwind()
        .await;
      match outcome {
        Ok(ControlFlow::Continue(())) => {}
        Ok(ControlFlow::Break(())) => break,
        Err(panic) => {
          self.state = WorkerState::Crashed;
          let message = panic_message(panic.as_ref());
          error!(command = %label, error = %message, "worker crashed");
          let _ = replies.send(Reply::Crashed {
            message: message.clone(),
            trace: format!("panic while handling '{label}': {message}"),
          });
          return Err(WorkerError::Crashed { message });
        }
      }
    }

    self.state = WorkerState::ShutDown;
    info!("worker shut down");
    Ok(())
  }

  /// Handle one command, emitting its replies.
  pub async fn handle(
    &mut self,
    command: Command,
    replies: &mpsc::UnboundedSender<Reply>,
  ) -> ControlFlow<()> {
    match command {
      Command::Execute {
        workflow_path,
        arguments,
        output_dir,
        log_level,
      } => {
        if let Err(e) = self
          .execute(&workflow_path, arguments, &output_dir, log_level.as_deref(), replies)
          .await
        {
          error!(error = %e, "workflow execution failed");
          emit(
            replies,
            Reply::Error {
              message: format!("Workflow execution error: {e}"),
              trace: error_trace(&e),
            },
          );
        }
        self.state = WorkerState::Idle;
      }
      Command::Ping => emit(
        replies,
        Reply::Success {
          message: "pong".to_string(),
          run_count: self.session.run_count,
        },
      ),
      Command::ClearCache => {
        info!("cache clear requested");
        self.full_cleanup();
        emit(replies, Reply::CacheInfo { info: self.cache_info() });
      }
      Command::CacheStatus => emit(replies, Reply::CacheInfo { info: self.cache_info() }),
      Command::Shutdown => {
        info!("shutdown requested");
        self.full_cleanup();
        self.state = WorkerState::ShutDown;
        emit(
          replies,
          Reply::Success {
            message: "Shutdown complete".to_string(),
            run_count: 0,
          },
        );
        return ControlFlow::Break(());
      }
    }

    ControlFlow::Continue(())
  }

  #[instrument(
    name = "worker_execute",
    skip(self, workflow_path, arguments, replies),
    fields(workflow_path = %workflow_path.display(), run_count = self.session.run_count)
  )]
  async fn execute(
    &mut self,
    workflow_path: &Path,
    arguments: BTreeMap<String, String>,
    output_dir: &Path,
    log_level: Option<&str>,
    replies: &mpsc::UnboundedSender<Reply>,
  ) -> Result<(), RuntimeError> {
    if let (Some(level), Some(hook)) = (log_level, &self.config.log_level_hook) {
      hook(level);
    }

    self.state = WorkerState::Loading;
    let bytes = tokio::fs::read(workflow_path)
      .await
      .map_err(|source| RuntimeError::Io {
        path: workflow_path.to_path_buf(),
        source,
      })?;
    let hash = content_hash(&bytes);

    if self.session.needs_reload(workflow_path, &hash) {
      if self.session.document.is_some() {
        emit(replies, Reply::progress("Workflow file changed - reloading resources..."));
      }
      self.full_cleanup();

      emit(
        replies,
        Reply::progress(format!("Loading workflow from {}", workflow_path.display())),
      );
      let document = WorkflowDocument::parse(workflow_path, &bytes)?;
      self.orchestrator.validate(&document)?;

      emit(
        replies,
        Reply::ResourceLoaded {
          name: document.id().to_string(),
        },
      );
      self.session.document = Some(document);
      self.session.workflow_path = Some(workflow_path.to_path_buf());
      self.session.content_hash = Some(hash);
    } else {
      emit(replies, Reply::progress("Reusing loaded resources from cache"));
    }
    self.session.output_dir = Some(output_dir.to_path_buf());

    let Some(document) = self.session.document.as_ref() else {
      return Err(RuntimeError::InvalidDocument {
        path: workflow_path.to_path_buf(),
        message: "no workflow loaded".to_string(),
      });
    };

    self.state = WorkerState::Executing;
    emit(
      replies,
      Reply::progress(format!("Executing workflow: {}", document.id())),
    );

    let arguments: Map<String, Value> = arguments
      .into_iter()
      .map(|(name, value)| (name, Value::String(value)))
      .collect();
    self
      .orchestrator
      .run(document, &arguments, &mut self.session.cache, output_dir)
      .await?;

    self.session.run_count += 1;
    self.light_cleanup();

    emit(replies, Reply::CacheInfo { info: self.cache_info() });
    emit(
      replies,
      Reply::Success {
        message: "Workflow completed successfully".to_string(),
        run_count: self.session.run_count,
      },
    );
    Ok(())
  }

  /// Release transient memory after a run. Cached resources stay resident.
  fn light_cleanup(&mut self) {
    debug!("performing inter-run cleanup");
    let runtime = self.orchestrator.runtime();
    runtime.release_memory(ReleaseLevel::Light);

    let memory = runtime.memory();
    if !memory.available || memory.allocated_bytes == 0 {
      return;
    }

    let previous = self.session.last_allocated;
    if previous > 0 {
      let growth = memory.allocated_bytes.saturating_sub(previous);
      if growth > self.config.memory_growth_warning_bytes {
        warn!(
          growth_bytes = growth,
          previous_bytes = previous,
          current_bytes = memory.allocated_bytes,
          "device memory grew between runs"
        );
      }
    }
    self.session.last_allocated = memory.allocated_bytes;
  }

  /// Drop the cached document and resources and release device memory.
  fn full_cleanup(&mut self) {
    info!(cached_resources = self.session.cache.len(), "performing full cleanup");
    self.session.reset();
    self.orchestrator.runtime().release_memory(ReleaseLevel::Full);
  }

  fn cache_info(&self) -> CacheInfo {
    CacheInfo {
      memory: self.orchestrator.runtime().memory(),
      run_count: self.session.run_count,
      cached_resources: self.session.cache.names(),
      workflow: self
        .session
        .document
        .as_ref()
        .map(|document| document.id().to_string()),
    }
  }
}

fn emit(replies: &mpsc::UnboundedSender<Reply>, reply: Reply) {
  if replies.send(reply).is_err() {
    debug!("reply channel closed, dropping reply");
  }
}

fn command_label(command: &Command) -> &'static str {
  match command {
    Command::Execute { .. } => "execute",
    Command::Shutdown => "shutdown",
    Command::Ping => "ping",
    Command::ClearCache => "clear-cache",
    Command::CacheStatus => "cache-status",
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message.to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "unknown panic".to_string()
  }
}
