//! Cache of constructed resources, keyed by the name of the step that created them.

use std::collections::HashMap;

use crate::action_runtime::ResourceHandle;

/// Resources that outlive a single step.
///
/// The orchestrator borrows the cache for one run. The worker keeps the same
/// cache across runs so expensive resources are built once.
#[derive(Default)]
pub struct ResourceCache {
  resources: HashMap<String, ResourceHandle>,
}

impl ResourceCache {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, step: &str) -> Option<ResourceHandle> {
    self.resources.get(step).cloned()
  }

  pub fn insert(&mut self, step: impl Into<String>, resource: ResourceHandle) {
    self.resources.insert(step.into(), resource);
  }

  pub fn contains(&self, step: &str) -> bool {
    self.resources.contains_key(step)
  }

  /// Names of cached resources, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.resources.keys().cloned().collect();
    names.sort();
    names
  }

  /// Drop every cached resource.
  pub fn clear(&mut self) {
    self.resources.clear();
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }
}

impl std::fmt::Debug for ResourceCache {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ResourceCache")
      .field("resources", &self.names())
      .finish()
  }
}
