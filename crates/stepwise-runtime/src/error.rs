//! Runtime error types.

use std::path::PathBuf;

use crate::action_runtime::ActionError;
use crate::sink::SinkError;

/// Broad classification of a [`RuntimeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Bad document, template, reference, or command. Never worth retrying.
  Configuration,
  /// Reading a document or persisting a result failed.
  Io,
  /// The action runtime failed while building or invoking a resource.
  Runtime,
}

/// Errors that can occur while running a workflow.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
  /// A result reference names a step that has not produced a result.
  #[error("unknown result reference '{reference}' (available results: {available:?})")]
  UnknownResult {
    reference: String,
    available: Vec<String>,
  },

  /// A step references a resource that is not in the resource cache.
  #[error("resource '{name}' not found (available resources: {available:?})")]
  UnknownResource { name: String, available: Vec<String> },

  /// A task names a command outside the registry.
  #[error("unknown task command '{command}' (known commands: {known:?})")]
  UnknownTask {
    command: String,
    known: Vec<&'static str>,
  },

  /// A supplied argument or `variable:` reference names an undeclared variable.
  #[error("variable <{name}> not found (declared variables: {declared:?})")]
  UnknownVariable { name: String, declared: Vec<String> },

  /// An argument template or argument set has the wrong shape.
  #[error("invalid arguments for '{action}': {message}")]
  InvalidArguments { action: String, message: String },

  /// The workflow document failed validation or could not be interpreted.
  #[error("invalid workflow document '{path}': {message}")]
  InvalidDocument { path: PathBuf, message: String },

  /// Reading a workflow document or task input failed.
  #[error("failed to read '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  /// Persisting a step result failed.
  #[error(transparent)]
  Persist(#[from] SinkError),

  /// The action runtime failed.
  #[error("action '{action}' failed: {source}")]
  Action {
    action: String,
    #[source]
    source: ActionError,
  },

  /// Context wrapper naming the step that failed.
  #[error("step '{step}' failed: {source}")]
  Step {
    step: String,
    #[source]
    source: Box<RuntimeError>,
  },
}

impl RuntimeError {
  /// Attach the name of the failing step.
  pub fn in_step(self, step: impl Into<String>) -> Self {
    RuntimeError::Step {
      step: step.into(),
      source: Box::new(self),
    }
  }

  /// Classify the error, looking through step context.
  pub fn kind(&self) -> ErrorKind {
    match self {
      RuntimeError::UnknownResult { .. }
      | RuntimeError::UnknownResource { .. }
      | RuntimeError::UnknownTask { .. }
      | RuntimeError::UnknownVariable { .. }
      | RuntimeError::InvalidArguments { .. }
      | RuntimeError::InvalidDocument { .. } => ErrorKind::Configuration,
      RuntimeError::Io { .. } | RuntimeError::Persist(_) => ErrorKind::Io,
      RuntimeError::Action { .. } => ErrorKind::Runtime,
      RuntimeError::Step { source, .. } => source.kind(),
    }
  }

  /// Name of the innermost failing step, if any.
  pub fn step(&self) -> Option<&str> {
    match self {
      RuntimeError::Step { step, source } => source.step().or(Some(step.as_str())),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_kind_looks_through_step_context() {
    let err = RuntimeError::UnknownTask {
      command: "nope".to_string(),
      known: vec!["gather_inputs"],
    }
    .in_step("format")
    .in_step("outer");

    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert_eq!(err.step(), Some("format"));
    assert!(err.to_string().contains("outer"));
  }

  #[test]
  fn test_unknown_result_names_reference() {
    let err = RuntimeError::UnknownResult {
      reference: "nope".to_string(),
      available: vec!["images".to_string()],
    };
    let message = err.to_string();
    assert!(message.contains("'nope'"));
    assert!(message.contains("images"));
  }
}
