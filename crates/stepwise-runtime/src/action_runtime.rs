//! The action runtime seam.
//!
//! The runtime never builds or invokes a model itself. It hands a resolved
//! resource specification to an [`ActionRuntime`] and invokes the returned
//! [`Resource`] once per argument set.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepwise_config::ResourceSpec;

/// Errors reported by an action runtime or one of its resources.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
  #[error("{0}")]
  Message(String),

  /// The device ran out of memory while building or invoking a resource.
  #[error("out of memory: {0}")]
  OutOfMemory(String),

  /// The resource does not provide the requested entry point.
  #[error("operation '{operation}' is not supported by this resource")]
  Unsupported { operation: String },
}

/// How aggressively device memory should be reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseLevel {
  /// Release transient allocations after a run. Cached resources stay resident.
  Light,
  /// Release everything that is no longer referenced.
  Full,
}

/// Snapshot of device memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceMemory {
  /// Whether an accelerator is present at all.
  pub available: bool,
  pub allocated_bytes: u64,
  pub reserved_bytes: u64,
  pub free_bytes: u64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub device_name: Option<String>,
}

/// A constructed, invocable resource such as a loaded model.
#[async_trait]
pub trait Resource: Send + Sync {
  /// Name of the step that created the resource.
  fn name(&self) -> &str;

  /// Invoke the resource with one resolved argument set.
  async fn invoke(&self, arguments: Value) -> Result<Value, ActionError>;

  /// Post-process raw outputs previously produced by this resource.
  async fn post_process(&self, _arguments: Value) -> Result<Value, ActionError> {
    Err(ActionError::Unsupported {
      operation: "post_process".to_string(),
    })
  }
}

/// Shared handle to a cached resource.
pub type ResourceHandle = Arc<dyn Resource>;

/// Builds resources from declarative specifications.
#[async_trait]
pub trait ActionRuntime: Send + Sync {
  /// Construct the resource declared by step `step`.
  async fn create_resource(
    &self,
    step: &str,
    spec: &ResourceSpec,
  ) -> Result<ResourceHandle, ActionError>;

  /// Current device memory usage.
  fn memory(&self) -> DeviceMemory {
    DeviceMemory::default()
  }

  /// Reclaim device memory.
  fn release_memory(&self, _level: ReleaseLevel) {}
}
