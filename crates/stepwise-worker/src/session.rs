use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use stepwise_runtime::{ResourceCache, WorkflowDocument};

/// State the worker keeps between commands.
#[derive(Debug, Default)]
pub struct Session {
  pub document: Option<WorkflowDocument>,
  pub workflow_path: Option<PathBuf>,
  pub content_hash: Option<String>,
  pub output_dir: Option<PathBuf>,
  pub cache: ResourceCache,
  pub run_count: u64,
  /// Allocated device memory after the previous run, in bytes.
  pub last_allocated: u64,
}

impl Session {
  pub fn new() -> Self {
    Self::default()
  }

  /// Drop the cached document and every cached resource.
  pub fn reset(&mut self) {
    self.document = None;
    self.workflow_path = None;
    self.content_hash = None;
    self.output_dir = None;
    self.cache.clear();
    self.run_count = 0;
    self.last_allocated = 0;
  }

  /// Whether a document at `path` with content hash `hash` must be (re)loaded.
  pub fn needs_reload(&self, path: &Path, hash: &str) -> bool {
    self.document.is_none()
      || self.content_hash.as_deref() != Some(hash)
      || self.workflow_path.as_deref() != Some(path)
  }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
  format!("{:x}", Sha256::digest(bytes))
}
