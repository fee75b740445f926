use std::path::PathBuf;

/// Configuration for the workflow runtime.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
  /// Directory that `builtin:<file>` nested-workflow paths resolve against.
  pub builtin_dir: PathBuf,
}

impl RuntimeConfig {
  pub fn new(builtin_dir: impl Into<PathBuf>) -> Self {
    Self {
      builtin_dir: builtin_dir.into(),
    }
  }
}
