use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const SETTINGS_FILE: &str = "settings.json";

/// User settings stored as `settings.json` in the data directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub log_level: String,
  pub output_dir: PathBuf,
  pub result_timeout_secs: u64,
  pub shutdown_timeout_secs: u64,
  pub terminate_timeout_secs: u64,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      log_level: "warn".to_string(),
      output_dir: PathBuf::from("./outputs"),
      result_timeout_secs: 300,
      shutdown_timeout_secs: 10,
      terminate_timeout_secs: 5,
    }
  }
}

impl Settings {
  /// Load settings from `data_dir`. A missing file yields the defaults.
  pub fn load(data_dir: &Path) -> Result<Self> {
    let path = data_dir.join(SETTINGS_FILE);
    if !path.exists() {
      return Ok(Self::default());
    }

    let content = std::fs::read_to_string(&path)
      .with_context(|| format!("failed to read settings file: {}", path.display()))?;
    serde_json::from_str(&content)
      .with_context(|| format!("failed to parse settings file: {}", path.display()))
  }

  pub fn result_timeout(&self) -> Duration {
    Duration::from_secs(self.result_timeout_secs)
  }

  pub fn shutdown_timeout(&self) -> Duration {
    Duration::from_secs(self.shutdown_timeout_secs)
  }

  pub fn terminate_timeout(&self) -> Duration {
    Duration::from_secs(self.terminate_timeout_secs)
  }
}

/// `$STEPWISE_HOME`, else `~/.stepwise`.
pub fn default_data_dir() -> Result<PathBuf> {
  if let Some(home) = std::env::var_os("STEPWISE_HOME") {
    return Ok(PathBuf::from(home));
  }
  let home = dirs::home_dir().context("could not determine home directory")?;
  Ok(home.join(".stepwise"))
}
