//! Step actions.
//!
//! A [`StepAction`] is what a step definition becomes once its resource is
//! built (or found), its nested document loaded, or its task command resolved.
//! Every action exposes the same contract: a name, an argument template, and
//! `run(arguments, cache)`.

use std::path::{Path, PathBuf};

use serde_json::Value;
use stepwise_config::{ArgumentTemplate, StepDef, StepKind};
use tracing::{debug, info};

use crate::action_runtime::ResourceHandle;
use crate::cache::ResourceCache;
use crate::document::WorkflowDocument;
use crate::error::RuntimeError;
use crate::orchestrator::Orchestrator;
use crate::task::TaskCommand;

/// Prefix selecting the built-in workflow directory.
pub const BUILTIN_PREFIX: &str = "builtin:";

/// Everything an action needs from the run it belongs to.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
  pub orchestrator: &'a Orchestrator,
  /// Document the step belongs to. Relative nested paths resolve against it.
  pub document: &'a WorkflowDocument,
  pub output_dir: &'a Path,
}

/// A materialized step.
pub enum StepAction {
  /// Invoke a resource created (or reused) under this step's name.
  Resource {
    name: String,
    template: ArgumentTemplate,
    resource: ResourceHandle,
  },
  /// Invoke a resource created by an earlier step, with this step's arguments.
  ResourceReference {
    name: String,
    template: ArgumentTemplate,
    resource: ResourceHandle,
  },
  /// Run a child document in an isolated scope.
  Workflow {
    name: String,
    template: ArgumentTemplate,
    document: WorkflowDocument,
  },
  /// Run a built-in task command.
  Task {
    name: String,
    template: ArgumentTemplate,
    command: TaskCommand,
    resource_reference: Option<String>,
  },
}

impl StepAction {
  /// Turn a step definition into an action.
  ///
  /// Resource steps reuse a handle already cached under their name and
  /// otherwise build one through the action runtime and cache it.
  pub async fn materialize(
    step: &StepDef,
    cache: &mut ResourceCache,
    ctx: RunContext<'_>,
  ) -> Result<Self, RuntimeError> {
    let name = step.name.clone();
    let template = step.argument_template();

    match &step.kind {
      StepKind::Resource(spec) => {
        let resource = match cache.get(&name) {
          Some(resource) => {
            info!(step = %name, "reusing cached resource");
            resource
          }
          None => {
            info!(step = %name, "creating resource");
            let resource = ctx
              .orchestrator
              .runtime()
              .create_resource(&name, spec)
              .await
              .map_err(|source| RuntimeError::Action {
                action: name.clone(),
                source,
              })?;
            cache.insert(name.clone(), resource.clone());
            resource
          }
        };
        Ok(StepAction::Resource {
          name,
          template,
          resource,
        })
      }

      StepKind::ResourceReference(spec) => {
        debug!(step = %name, reference = %spec.reference_name, "referencing cached resource");
        let resource = cache
          .get(&spec.reference_name)
          .ok_or_else(|| RuntimeError::UnknownResource {
            name: spec.reference_name.clone(),
            available: cache.names(),
          })?;
        Ok(StepAction::ResourceReference {
          name,
          template,
          resource,
        })
      }

      StepKind::Workflow(reference) => {
        let path = resolve_workflow_path(
          &reference.path,
          &ctx.orchestrator.config().builtin_dir,
          ctx.document.base_dir(),
        );
        debug!(step = %name, path = %path.display(), "loading nested workflow");
        let document = WorkflowDocument::load(&path).await?;
        ctx.orchestrator.validate(&document)?;
        Ok(StepAction::Workflow {
          name,
          template,
          document,
        })
      }

      StepKind::Task(task) => {
        let command = TaskCommand::resolve(&task.command)?;
        Ok(StepAction::Task {
          name,
          template,
          command,
          resource_reference: task.resource_reference.clone(),
        })
      }
    }
  }

  pub fn name(&self) -> &str {
    match self {
      StepAction::Resource { name, .. }
      | StepAction::ResourceReference { name, .. }
      | StepAction::Workflow { name, .. }
      | StepAction::Task { name, .. } => name,
    }
  }

  pub fn argument_template(&self) -> &ArgumentTemplate {
    match self {
      StepAction::Resource { template, .. }
      | StepAction::ResourceReference { template, .. }
      | StepAction::Workflow { template, .. }
      | StepAction::Task { template, .. } => template,
    }
  }

  /// Short label used in logs.
  pub fn kind(&self) -> &'static str {
    match self {
      StepAction::Resource { .. } => "resource",
      StepAction::ResourceReference { .. } => "resource_reference",
      StepAction::Workflow { .. } => "workflow",
      StepAction::Task { .. } => "task",
    }
  }

  /// Run the action with one resolved argument set.
  ///
  /// A nested workflow gets the argument set as its variable values and a
  /// fresh result store and resource cache.
  pub async fn run(
    &self,
    arguments: Value,
    cache: &ResourceCache,
    ctx: RunContext<'_>,
  ) -> Result<Value, RuntimeError> {
    match self {
      StepAction::Resource { name, resource, .. }
      | StepAction::ResourceReference { name, resource, .. } => resource
        .invoke(arguments)
        .await
        .map_err(|source| RuntimeError::Action {
          action: name.clone(),
          source,
        }),

      StepAction::Workflow { name, document, .. } => {
        let Value::Object(arguments) = arguments else {
          return Err(RuntimeError::InvalidArguments {
            action: name.clone(),
            message: "nested workflow arguments must be an object".to_string(),
          });
        };
        let mut child_cache = ResourceCache::new();
        let artifacts = ctx
          .orchestrator
          .run(document, &arguments, &mut child_cache, ctx.output_dir)
          .await?;
        Ok(Value::Array(artifacts))
      }

      StepAction::Task {
        command,
        resource_reference,
        ..
      } => {
        command
          .run(arguments, resource_reference.as_deref(), cache)
          .await
      }
    }
  }
}

/// Resolve a nested workflow path.
///
/// `builtin:<file>` resolves against `builtin_dir`, relative paths against the
/// parent document's directory.
pub fn resolve_workflow_path(path: &str, builtin_dir: &Path, base_dir: &Path) -> PathBuf {
  if let Some(file) = path.strip_prefix(BUILTIN_PREFIX) {
    return builtin_dir.join(file);
  }
  let path = Path::new(path);
  if path.is_absolute() {
    path.to_path_buf()
  } else {
    base_dir.join(path)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_resolve_workflow_path() {
    let builtin = Path::new("/opt/stepwise/workflows");
    let base = Path::new("/home/me/flows");

    assert_eq!(
      resolve_workflow_path("builtin:upscale.json", builtin, base),
      PathBuf::from("/opt/stepwise/workflows/upscale.json")
    );
    assert_eq!(
      resolve_workflow_path("sub/child.json", builtin, base),
      PathBuf::from("/home/me/flows/sub/child.json")
    );
    assert_eq!(
      resolve_workflow_path("/abs/child.json", builtin, base),
      PathBuf::from("/abs/child.json")
    );
  }
}
