//! Workflow documents as loaded from disk.
//!
//! A [`WorkflowDocument`] keeps the raw JSON so variables can be substituted
//! into a fresh copy on every run. The cached source is never mutated.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::RuntimeError;

const STEP_KINDS: [&str; 5] = [
  "resource",
  "resource_reference",
  "resource-reference",
  "workflow",
  "task",
];

/// A loaded, unsubstituted workflow document.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDocument {
  path: PathBuf,
  source: Value,
}

impl WorkflowDocument {
  /// Read and parse a document from disk.
  pub async fn load(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
    let path = path.as_ref();
    debug!(path = %path.display(), "loading workflow document");
    let bytes = tokio::fs::read(path).await.map_err(|source| RuntimeError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    Self::parse(path, &bytes)
  }

  /// Parse document bytes read from `path`.
  pub fn parse(path: impl Into<PathBuf>, bytes: &[u8]) -> Result<Self, RuntimeError> {
    let path = path.into();
    let source = serde_json::from_slice(bytes).map_err(|e| RuntimeError::InvalidDocument {
      path: path.clone(),
      message: e.to_string(),
    })?;
    Ok(Self { path, source })
  }

  pub fn from_value(path: impl Into<PathBuf>, source: Value) -> Self {
    Self {
      path: path.into(),
      source,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn source(&self) -> &Value {
    &self.source
  }

  /// The document id, or `"unknown"` when absent.
  pub fn id(&self) -> &str {
    self.source.get("id").and_then(Value::as_str).unwrap_or("unknown")
  }

  /// Declared variables and their defaults, if the document has a variables block.
  pub fn variables(&self) -> Option<&Map<String, Value>> {
    self.source.get("variables").and_then(Value::as_object)
  }

  /// Directory relative nested-workflow paths resolve against.
  pub fn base_dir(&self) -> &Path {
    self.path.parent().unwrap_or_else(|| Path::new(""))
  }
}

/// Validates a document before it is run.
pub trait DocumentValidator: Send + Sync {
  /// Returns a human-readable message describing the first problem found.
  fn validate(&self, document: &WorkflowDocument) -> Result<(), String>;
}

/// Checks the document shape without a schema.
///
/// - top level is an object with a string `id` and a `steps` array
/// - `variables`, when present, is an object
/// - every step is an object with a unique string `name` and exactly one of
///   `resource`, `resource_reference`, `workflow`, `task` given as an object
/// - `result`, when present, is an object
#[derive(Debug, Default)]
pub struct StructuralValidator;

impl DocumentValidator for StructuralValidator {
  fn validate(&self, document: &WorkflowDocument) -> Result<(), String> {
    let root = document
      .source()
      .as_object()
      .ok_or("document must be an object")?;

    match root.get("id") {
      Some(Value::String(_)) => {}
      Some(_) => return Err("'id' must be a string".to_string()),
      None => return Err("missing required property 'id'".to_string()),
    }

    if root.get("variables").is_some_and(|variables| !variables.is_object()) {
      return Err("'variables' must be an object".to_string());
    }

    let steps = root
      .get("steps")
      .ok_or("missing required property 'steps'")?
      .as_array()
      .ok_or("'steps' must be an array")?;

    let mut names = HashSet::new();
    for (index, step) in steps.iter().enumerate() {
      let step = step
        .as_object()
        .ok_or_else(|| format!("steps[{index}] must be an object"))?;

      let name = step
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| format!("steps[{index}] is missing a string 'name'"))?;

      if !names.insert(name) {
        return Err(format!("duplicate step name '{name}'"));
      }

      let kinds: Vec<&str> = STEP_KINDS
        .iter()
        .copied()
        .filter(|kind| step.contains_key(*kind))
        .collect();
      if kinds.len() != 1 {
        return Err(format!(
          "step '{name}' must declare exactly one of resource, resource_reference, \
           workflow, task (found {kinds:?})"
        ));
      }
      if !step[kinds[0]].is_object() {
        return Err(format!("step '{name}': '{}' must be an object", kinds[0]));
      }

      if step.get("result").is_some_and(|result| !result.is_object()) {
        return Err(format!("step '{name}': 'result' must be an object"));
      }
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn validate(source: Value) -> Result<(), String> {
    StructuralValidator.validate(&WorkflowDocument::from_value("wf.json", source))
  }

  #[test]
  fn test_valid_document() {
    let result = validate(json!({
      "id": "wf",
      "variables": { "prompt": "x" },
      "steps": [
        { "name": "a", "task": { "command": "gather_inputs" } },
        { "name": "b", "resource-reference": { "reference_name": "a" }, "result": { "save": false } }
      ]
    }));
    assert_eq!(result, Ok(()));
  }

  #[test]
  fn test_missing_steps() {
    let err = validate(json!({ "id": "wf" })).unwrap_err();
    assert!(err.contains("steps"));
  }

  #[test]
  fn test_duplicate_step_names() {
    let err = validate(json!({
      "id": "wf",
      "steps": [
        { "name": "a", "task": { "command": "gather_inputs" } },
        { "name": "a", "task": { "command": "gather_inputs" } }
      ]
    }))
    .unwrap_err();
    assert!(err.contains("duplicate"));
  }

  #[test]
  fn test_step_without_kind() {
    let err = validate(json!({ "id": "wf", "steps": [{ "name": "a" }] })).unwrap_err();
    assert!(err.contains("exactly one"));
  }

  #[test]
  fn test_parse_and_accessors() {
    let document = WorkflowDocument::parse("/tmp/flows/wf.json", br#"{ "steps": [] }"#).unwrap();
    assert_eq!(document.id(), "unknown");
    assert_eq!(document.base_dir(), Path::new("/tmp/flows"));
    assert!(document.variables().is_none());

    let err = WorkflowDocument::parse("bad.json", b"{ nope").unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidDocument { .. }));
  }
}
