use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Result-handling metadata attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultDef {
  /// MIME type of the step's artifacts, e.g. "image/png" or "application/json".
  /// Nothing is persisted when absent.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub content_type: Option<String>,

  /// Whether the artifacts should be persisted at all.
  #[serde(default = "default_save")]
  pub save: bool,

  /// Prefix prepended to the generated file base name.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub file_base_name: Option<String>,

  /// Encoder options (fps, sample_rate, ...) passed through untouched.
  #[serde(flatten)]
  pub options: Map<String, Value>,
}

fn default_save() -> bool {
  true
}

impl Default for ResultDef {
  fn default() -> Self {
    Self {
      content_type: None,
      save: true,
      file_base_name: None,
      options: Map::new(),
    }
  }
}
