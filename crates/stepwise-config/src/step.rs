use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::StepDefError;
use crate::result::ResultDef;
use crate::template::ArgumentTemplate;

/// One named step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawStepDef", into = "RawStepDef")]
pub struct StepDef {
  pub name: String,
  pub kind: StepKind,
  pub result: ResultDef,
}

/// What a step does. Exactly one is present in the document.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
  /// Build a new resource and invoke it.
  Resource(ResourceSpec),
  /// Invoke a resource created by an earlier step with new arguments.
  ResourceReference(ResourceReferenceSpec),
  /// Run another workflow document.
  Workflow(WorkflowRef),
  /// Run one of the built-in task commands.
  Task(TaskSpec),
}

impl StepKind {
  /// Short label used in logs.
  pub fn label(&self) -> &'static str {
    match self {
      StepKind::Resource(_) => "resource",
      StepKind::ResourceReference(_) => "resource_reference",
      StepKind::Workflow(_) => "workflow",
      StepKind::Task(_) => "task",
    }
  }
}

/// Declarative specification of a resource.
///
/// Everything except `arguments` is handed to the action runtime untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSpec {
  #[serde(default)]
  pub arguments: ArgumentTemplate,
  #[serde(flatten)]
  pub options: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReferenceSpec {
  /// Name of the step that created the resource.
  pub reference_name: String,
  #[serde(default)]
  pub arguments: ArgumentTemplate,
}

/// Reference to a nested workflow document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRef {
  /// `builtin:<file>`, an absolute path, or a path relative to the parent document.
  pub path: String,
  /// Injected as the child's top-level variable values.
  #[serde(default)]
  pub arguments: ArgumentTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
  pub command: String,
  /// Literal argument sets, used verbatim when present.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub inputs: Option<Vec<Value>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub arguments: Option<Map<String, Value>>,
  /// Resource consulted by commands that post-process a resource's output.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resource_reference: Option<String>,
}

impl TaskSpec {
  /// `inputs` wins over `arguments`; a task with neither gets an empty mapping.
  pub fn argument_template(&self) -> ArgumentTemplate {
    match (&self.inputs, &self.arguments) {
      (Some(inputs), _) => ArgumentTemplate::Sequence(inputs.clone()),
      (None, Some(arguments)) => ArgumentTemplate::Mapping(arguments.clone()),
      (None, None) => ArgumentTemplate::default(),
    }
  }
}

impl StepDef {
  /// The argument template of whichever kind this step is.
  pub fn argument_template(&self) -> ArgumentTemplate {
    match &self.kind {
      StepKind::Resource(spec) => spec.arguments.clone(),
      StepKind::ResourceReference(spec) => spec.arguments.clone(),
      StepKind::Workflow(reference) => reference.arguments.clone(),
      StepKind::Task(task) => task.argument_template(),
    }
  }
}

/// On-disk shape of a step: four optional discriminator blocks.
#[derive(Serialize, Deserialize)]
struct RawStepDef {
  name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  resource: Option<ResourceSpec>,
  #[serde(
    default,
    alias = "resource-reference",
    skip_serializing_if = "Option::is_none"
  )]
  resource_reference: Option<ResourceReferenceSpec>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  workflow: Option<WorkflowRef>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  task: Option<TaskSpec>,
  #[serde(default)]
  result: ResultDef,
}

impl TryFrom<RawStepDef> for StepDef {
  type Error = StepDefError;

  fn try_from(raw: RawStepDef) -> Result<Self, Self::Error> {
    let mut kinds = Vec::with_capacity(1);
    if let Some(spec) = raw.resource {
      kinds.push(StepKind::Resource(spec));
    }
    if let Some(spec) = raw.resource_reference {
      kinds.push(StepKind::ResourceReference(spec));
    }
    if let Some(reference) = raw.workflow {
      kinds.push(StepKind::Workflow(reference));
    }
    if let Some(task) = raw.task {
      kinds.push(StepKind::Task(task));
    }

    if kinds.len() != 1 {
      return Err(StepDefError::AmbiguousKind {
        name: raw.name,
        found: kinds.len(),
      });
    }

    Ok(StepDef {
      name: raw.name,
      kind: kinds.remove(0),
      result: raw.result,
    })
  }
}

impl From<StepDef> for RawStepDef {
  fn from(step: StepDef) -> Self {
    let mut raw = RawStepDef {
      name: step.name,
      resource: None,
      resource_reference: None,
      workflow: None,
      task: None,
      result: step.result,
    };
    match step.kind {
      StepKind::Resource(spec) => raw.resource = Some(spec),
      StepKind::ResourceReference(spec) => raw.resource_reference = Some(spec),
      StepKind::Workflow(reference) => raw.workflow = Some(reference),
      StepKind::Task(task) => raw.task = Some(task),
    }
    raw
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_resource_step() {
    let step: StepDef = serde_json::from_value(json!({
      "name": "generate",
      "resource": {
        "model": "sdxl-turbo",
        "arguments": { "prompt": "a marmot", "num_inference_steps": 2 }
      },
      "result": { "content_type": "image/png" }
    }))
    .unwrap();

    assert_eq!(step.name, "generate");
    let StepKind::Resource(spec) = &step.kind else {
      panic!("expected resource step");
    };
    assert_eq!(spec.options["model"], "sdxl-turbo");
    assert!(!spec.options.contains_key("arguments"));
    assert_eq!(step.result.content_type.as_deref(), Some("image/png"));
    assert!(step.result.save);
  }

  #[test]
  fn test_resource_reference_accepts_kebab_key() {
    let step: StepDef = serde_json::from_value(json!({
      "name": "again",
      "resource-reference": { "reference_name": "generate", "arguments": { "prompt": "x" } }
    }))
    .unwrap();

    assert_eq!(step.kind.label(), "resource_reference");
  }

  #[test]
  fn test_task_inputs_win_over_arguments() {
    let step: StepDef = serde_json::from_value(json!({
      "name": "inputs",
      "task": {
        "command": "gather_inputs",
        "inputs": [{ "a": 1 }, { "a": 2 }],
        "arguments": { "ignored": true }
      }
    }))
    .unwrap();

    assert_eq!(
      step.argument_template(),
      ArgumentTemplate::Sequence(vec![json!({ "a": 1 }), json!({ "a": 2 })])
    );
  }

  #[test]
  fn test_missing_kind_is_rejected() {
    let result: Result<StepDef, _> = serde_json::from_value(json!({ "name": "empty" }));
    let message = result.unwrap_err().to_string();
    assert!(message.contains("exactly one"), "{message}");
  }

  #[test]
  fn test_two_kinds_are_rejected() {
    let result: Result<StepDef, _> = serde_json::from_value(json!({
      "name": "both",
      "task": { "command": "gather_inputs" },
      "workflow": { "path": "child.json" }
    }));
    let message = result.unwrap_err().to_string();
    assert!(message.contains("found 2"), "{message}");
  }

  #[test]
  fn test_serialize_keeps_discriminator() {
    let step = StepDef {
      name: "child".to_string(),
      kind: StepKind::Workflow(WorkflowRef {
        path: "builtin:upscale.json".to_string(),
        arguments: ArgumentTemplate::default(),
      }),
      result: ResultDef::default(),
    };

    let value = serde_json::to_value(&step).unwrap();
    assert_eq!(value["workflow"]["path"], "builtin:upscale.json");
    assert!(value.get("task").is_none());
  }
}
