//! Result persistence.
//!
//! After each step the orchestrator hands the step's result to a
//! [`ResultSink`]. The filesystem sink writes JSON and text artifacts. Binary
//! content types (images, audio, video) are encoded by the action runtime and
//! are skipped here.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::result::{StepResult, artifact_list};

/// Longest accepted file base name.
pub const MAX_BASE_NAME_LENGTH: usize = 200;

/// Error type for result persistence.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
  #[error("failed to write '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("output path '{path}' exists but is not a directory")]
  NotADirectory { path: PathBuf },

  #[error("invalid file base name '{name}'")]
  InvalidName { name: String },

  #[error("failed to encode result: {0}")]
  Encode(#[from] serde_json::Error),
}

/// Persists step results.
#[async_trait]
pub trait ResultSink: Send + Sync {
  /// Save `result` under `output_dir` using `base_name` as the default file stem.
  async fn save(
    &self,
    result: &StepResult,
    output_dir: &Path,
    base_name: &str,
  ) -> Result<(), SinkError>;
}

/// Sink that persists nothing.
#[derive(Debug, Default)]
pub struct NoopSink;

#[async_trait]
impl ResultSink for NoopSink {
  async fn save(
    &self,
    _result: &StepResult,
    _output_dir: &Path,
    _base_name: &str,
  ) -> Result<(), SinkError> {
    Ok(())
  }
}

/// Filesystem result sink.
///
/// - `application/json` (any `*json` type): one pretty-printed file per
///   iteration, `<base>-<i>.json`.
/// - `text/*`: one file per artifact, `<base>-<i>.<j>.<ext>`. Object artifacts
///   are written field by field as `<base>-<i>.<j>-<key>.<ext>`.
#[derive(Debug, Default)]
pub struct FsResultSink;

impl FsResultSink {
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl ResultSink for FsResultSink {
  async fn save(
    &self,
    result: &StepResult,
    output_dir: &Path,
    base_name: &str,
  ) -> Result<(), SinkError> {
    validate_base_name(base_name)?;
    ensure_dir(output_dir).await?;

    let definition = result.definition();
    let content_type = match (&definition.content_type, definition.save) {
      (Some(content_type), true) => content_type.as_str(),
      _ => {
        debug!(base_name = %base_name, "skipping save - disabled or no content type specified");
        return Ok(());
      }
    };

    let base = match &definition.file_base_name {
      Some(prefix) => {
        validate_base_name(prefix)?;
        format!("{prefix}{base_name}")
      }
      None => base_name.to_string(),
    };

    if content_type.ends_with("json") {
      for (i, output) in result.outputs().iter().enumerate() {
        let path = output_dir.join(format!("{base}-{i}.json"));
        info!(path = %path.display(), "saving JSON result");
        let content = serde_json::to_string_pretty(output)?;
        write(&path, content).await?;
      }
      return Ok(());
    }

    let Some(extension) = text_extension(content_type) else {
      debug!(
        content_type = %content_type,
        "content type is encoded by the action runtime, skipping"
      );
      return Ok(());
    };

    for (i, output) in result.outputs().iter().enumerate() {
      for (j, artifact) in artifact_list(output).iter().enumerate() {
        save_text(output_dir, artifact, format!("{base}-{i}.{j}"), extension).await?;
      }
    }

    Ok(())
  }
}

fn save_text<'a>(
  dir: &'a Path,
  artifact: &'a Value,
  stem: String,
  extension: &'a str,
) -> futures::future::BoxFuture<'a, Result<(), SinkError>> {
  Box::pin(async move {
    validate_base_name(&stem)?;
    match artifact {
      Value::Null => {
        warn!(stem = %stem, "skipping null artifact");
      }
      Value::Object(map) => {
        for (key, value) in map {
          save_text(dir, value, format!("{stem}-{key}"), extension).await?;
        }
      }
      Value::String(text) => {
        let path = dir.join(format!("{stem}.{extension}"));
        info!(path = %path.display(), "saving text artifact");
        write(&path, text.clone()).await?;
      }
      other => {
        let path = dir.join(format!("{stem}.{extension}"));
        info!(path = %path.display(), "saving text artifact");
        write(&path, other.to_string()).await?;
      }
    }
    Ok(())
  })
}

fn text_extension(content_type: &str) -> Option<&'static str> {
  let subtype = content_type.strip_prefix("text/")?;
  Some(match subtype {
    "markdown" => "md",
    "html" => "html",
    "csv" => "csv",
    _ => "txt",
  })
}

fn validate_base_name(name: &str) -> Result<(), SinkError> {
  let valid = !name.is_empty()
    && name.len() <= MAX_BASE_NAME_LENGTH
    && !name.contains(['/', '\\', '\0']);
  if valid {
    Ok(())
  } else {
    Err(SinkError::InvalidName {
      name: name.to_string(),
    })
  }
}

async fn ensure_dir(dir: &Path) -> Result<(), SinkError> {
  match fs::metadata(dir).await {
    Ok(metadata) if metadata.is_dir() => Ok(()),
    Ok(_) => Err(SinkError::NotADirectory {
      path: dir.to_path_buf(),
    }),
    Err(_) => {
      debug!(path = %dir.display(), "creating output directory");
      fs::create_dir_all(dir).await.map_err(|source| SinkError::Io {
        path: dir.to_path_buf(),
        source,
      })
    }
  }
}

async fn write(path: &Path, content: String) -> Result<(), SinkError> {
  fs::write(path, content).await.map_err(|source| SinkError::Io {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use stepwise_config::ResultDef;
  use tempfile::TempDir;

  fn result(definition: Value, outputs: Vec<Value>) -> StepResult {
    let mut result = StepResult::new(serde_json::from_value::<ResultDef>(definition).unwrap());
    for output in outputs {
      result.push(output);
    }
    result
  }

  #[tokio::test]
  async fn test_saves_json_per_iteration() {
    let dir = TempDir::new().unwrap();
    let result = result(
      json!({ "content_type": "application/json" }),
      vec![json!({ "a": 1 }), json!([1, 2])],
    );

    FsResultSink::new().save(&result, dir.path(), "wf-step.0").await.unwrap();

    let first = std::fs::read_to_string(dir.path().join("wf-step.0-0.json")).unwrap();
    assert_eq!(serde_json::from_str::<Value>(&first).unwrap(), json!({ "a": 1 }));
    assert!(dir.path().join("wf-step.0-1.json").exists());
  }

  #[tokio::test]
  async fn test_saves_text_artifacts_with_prefix() {
    let dir = TempDir::new().unwrap();
    let result = result(
      json!({ "content_type": "text/plain", "file_base_name": "cap-" }),
      vec![json!(["one", null]), json!({ "text": "two" })],
    );

    FsResultSink::new().save(&result, dir.path(), "wf-step.1").await.unwrap();

    let path = dir.path().join("cap-wf-step.1-0.0.txt");
    assert_eq!(std::fs::read_to_string(path).unwrap(), "one");
    assert!(!dir.path().join("cap-wf-step.1-0.1.txt").exists());
    assert!(dir.path().join("cap-wf-step.1-1.0-text.txt").exists());
  }

  #[tokio::test]
  async fn test_skips_without_content_type_or_when_disabled() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().join("out");

    let untyped = result(json!({}), vec![json!("x")]);
    FsResultSink::new().save(&untyped, &out, "wf-a.0").await.unwrap();

    let disabled = result(json!({ "content_type": "text/plain", "save": false }), vec![json!("x")]);
    FsResultSink::new().save(&disabled, &out, "wf-b.1").await.unwrap();

    assert!(out.is_dir());
    assert_eq!(std::fs::read_dir(&out).unwrap().count(), 0);
  }

  #[tokio::test]
  async fn test_rejects_long_base_name() {
    let dir = TempDir::new().unwrap();
    let result = result(json!({ "content_type": "text/plain" }), vec![json!("x")]);
    let name = "n".repeat(MAX_BASE_NAME_LENGTH + 1);

    let err = FsResultSink::new().save(&result, dir.path(), &name).await.unwrap_err();
    assert!(matches!(err, SinkError::InvalidName { .. }));
  }

  #[tokio::test]
  async fn test_binary_content_types_are_skipped() {
    let dir = TempDir::new().unwrap();
    let result = result(json!({ "content_type": "image/png" }), vec![json!("a.png")]);

    FsResultSink::new().save(&result, dir.path(), "wf-gen.0").await.unwrap();
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
  }
}
