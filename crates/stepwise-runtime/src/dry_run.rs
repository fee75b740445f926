use async_trait::async_trait;
use serde_json::{Value, json};
use stepwise_config::ResourceSpec;
use tracing::info;

use crate::action_runtime::{ActionError, ActionRuntime, Resource, ResourceHandle};

/// Action runtime that builds echo resources instead of loading models.
///
/// Each invocation returns `{ "resource": <name>, "options": <spec>, "arguments": <args> }`,
/// which is enough to exercise a document end to end.
#[derive(Debug, Default)]
pub struct DryRunRuntime;

impl DryRunRuntime {
  pub fn new() -> Self {
    Self
  }
}

#[async_trait]
impl ActionRuntime for DryRunRuntime {
  async fn create_resource(
    &self,
    step: &str,
    spec: &ResourceSpec,
  ) -> Result<ResourceHandle, ActionError> {
    info!(step = %step, "creating dry-run resource");
    Ok(std::sync::Arc::new(EchoResource {
      name: step.to_string(),
      options: Value::Object(spec.options.clone()),
    }))
  }
}

struct EchoResource {
  name: String,
  options: Value,
}

#[async_trait]
impl Resource for EchoResource {
  fn name(&self) -> &str {
    &self.name
  }

  async fn invoke(&self, arguments: Value) -> Result<Value, ActionError> {
    Ok(json!({
      "resource": self.name,
      "options": self.options,
      "arguments": arguments,
    }))
  }

  async fn post_process(&self, arguments: Value) -> Result<Value, ActionError> {
    Ok(arguments)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_echo_resource() {
    let spec: ResourceSpec = serde_json::from_value(json!({ "model": "sdxl", "arguments": {} })).unwrap();
    let resource = DryRunRuntime::new().create_resource("gen", &spec).await.unwrap();

    let output = resource.invoke(json!({ "prompt": "x" })).await.unwrap();
    assert_eq!(output["resource"], "gen");
    assert_eq!(output["options"]["model"], "sdxl");
    assert_eq!(output["arguments"]["prompt"], "x");
  }
}
