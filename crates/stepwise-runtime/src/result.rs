//! Step results and the per-run result store.

use std::collections::HashMap;

use serde_json::Value;
use stepwise_config::ResultDef;
use tracing::{debug, warn};

/// The ordered outputs of every iteration of one step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
  definition: ResultDef,
  outputs: Vec<Value>,
}

impl StepResult {
  /// Create an empty result carrying the step's result-handling metadata.
  pub fn new(definition: ResultDef) -> Self {
    Self {
      definition,
      outputs: Vec::new(),
    }
  }

  /// Build a result from already-produced outputs.
  pub fn from_outputs(outputs: impl IntoIterator<Item = Value>) -> Self {
    let mut result = Self::new(ResultDef::default());
    for output in outputs {
      result.push(output);
    }
    result
  }

  /// Append the output of one iteration.
  ///
  /// Bare string outputs lose surrounding whitespace and double quotes.
  pub fn push(&mut self, output: Value) {
    let output = match output {
      Value::String(text) => Value::String(clean_text(&text)),
      other => other,
    };
    self.outputs.push(output);
  }

  /// Raw per-iteration outputs, in iteration order.
  pub fn outputs(&self) -> &[Value] {
    &self.outputs
  }

  pub fn definition(&self) -> &ResultDef {
    &self.definition
  }

  pub fn is_empty(&self) -> bool {
    self.outputs.is_empty()
  }

  /// Every artifact, with list-valued outputs flattened in place.
  pub fn artifacts(&self) -> Vec<Value> {
    let artifacts: Vec<Value> = self.outputs.iter().flat_map(artifact_list).collect();
    debug!(count = artifacts.len(), "retrieved artifacts");
    artifacts
  }

  /// The value of `field` for every artifact that has it.
  ///
  /// Artifacts that are not objects, or lack the field, are skipped.
  pub fn values_of(&self, field: &str) -> Vec<Value> {
    let mut values = Vec::new();
    for artifact in self.outputs.iter().flat_map(artifact_list) {
      match &artifact {
        Value::Object(map) => {
          if let Some(value) = map.get(field) {
            values.push(value.clone());
          }
        }
        other => {
          warn!(
            field = %field,
            artifact = %type_name(other),
            "skipping non-object artifact while extracting field"
          );
        }
      }
    }
    values
  }
}

/// Artifacts contained in one iteration output.
pub(crate) fn artifact_list(output: &Value) -> Vec<Value> {
  match output {
    Value::Array(items) => items.clone(),
    other => vec![other.clone()],
  }
}

fn clean_text(text: &str) -> String {
  text.trim().trim_matches('"').trim().to_string()
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

/// Results of the steps completed so far in one run, keyed by step name.
///
/// Results are frozen once inserted: the store hands out shared references only.
#[derive(Debug, Default)]
pub struct ResultStore {
  results: HashMap<String, StepResult>,
}

impl ResultStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn insert(&mut self, step: impl Into<String>, result: StepResult) {
    self.results.insert(step.into(), result);
  }

  pub fn get(&self, step: &str) -> Option<&StepResult> {
    self.results.get(step)
  }

  pub fn contains(&self, step: &str) -> bool {
    self.results.contains_key(step)
  }

  /// Step names with results, sorted for stable error messages.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.results.keys().cloned().collect();
    names.sort();
    names
  }

  pub fn len(&self) -> usize {
    self.results.len()
  }

  pub fn is_empty(&self) -> bool {
    self.results.is_empty()
  }
}

impl FromIterator<(String, StepResult)> for ResultStore {
  fn from_iter<I: IntoIterator<Item = (String, StepResult)>>(iter: I) -> Self {
    Self {
      results: iter.into_iter().collect(),
    }
  }
}
