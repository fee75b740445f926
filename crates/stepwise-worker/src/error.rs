use stepwise_runtime::RuntimeError;

/// Errors raised by the worker and its transports.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
  #[error("failed to spawn worker process: {0}")]
  Spawn(#[source] std::io::Error),

  #[error("worker i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("malformed worker message: {0}")]
  Protocol(#[from] serde_json::Error),

  #[error("no reply from worker within {secs}s")]
  Timeout { secs: u64 },

  #[error("worker channel closed")]
  Closed,

  /// The worker stopped outside command handling.
  #[error("worker crashed: {message}")]
  Crashed { message: String },

  #[error(transparent)]
  Runtime(#[from] RuntimeError),
}

/// Render an error and its sources, one per line.
pub fn error_trace(error: &(dyn std::error::Error + 'static)) -> String {
  let mut trace = error.to_string();
  let mut source = error.source();
  while let Some(cause) = source {
    trace.push_str("\n  caused by: ");
    trace.push_str(&cause.to_string());
    source = cause.source();
  }
  trace
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_trace_includes_sources() {
    let err = RuntimeError::UnknownResult {
      reference: "nope".to_string(),
      available: vec![],
    }
    .in_step("caption");

    let trace = error_trace(&err);
    let lines: Vec<&str> = trace.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[0].starts_with("step 'caption' failed"));
    assert!(lines[1].contains("caused by: unknown result reference 'nope'"));
  }
}
