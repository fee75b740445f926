use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::step::StepDef;

/// A workflow document after variable substitution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDef {
  pub id: String,
  /// Declared variables and their default values.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub variables: Option<Map<String, Value>>,
  pub steps: Vec<StepDef>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_parse_workflow() {
    let workflow: WorkflowDef = serde_json::from_value(json!({
      "id": "captions",
      "variables": { "prompt": "a marmot" },
      "steps": [
        { "name": "inputs", "task": { "command": "gather_inputs", "arguments": { "prompt": "a marmot" } } },
        { "name": "child", "workflow": { "path": "child.json" } }
      ]
    }))
    .unwrap();

    assert_eq!(workflow.id, "captions");
    assert_eq!(workflow.steps.len(), 2);
    assert_eq!(workflow.steps[1].name, "child");
  }

  #[test]
  fn test_variables_are_optional() {
    let workflow: WorkflowDef =
      serde_json::from_value(json!({ "id": "empty", "steps": [] })).unwrap();
    assert!(workflow.variables.is_none());
  }
}
