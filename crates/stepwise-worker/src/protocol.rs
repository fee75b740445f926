//! Worker message protocol.
//!
//! Commands flow from the driver to the worker and replies flow back, both as
//! internally tagged JSON records:
//!
//! ```json
//! { "type": "execute", "workflow_path": "flows/caption.json", "arguments": { "prompt": "a marmot" }, "output_dir": "outputs" }
//! { "type": "progress", "message": "Reusing loaded resources from cache" }
//! { "type": "success", "message": "Workflow completed successfully", "run_count": 2 }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use stepwise_runtime::DeviceMemory;

/// A command sent to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Command {
  /// Run a workflow document, reusing cached resources when its content is unchanged.
  Execute {
    workflow_path: PathBuf,
    #[serde(default)]
    arguments: BTreeMap<String, String>,
    output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_level: Option<String>,
  },
  /// Release everything and stop.
  Shutdown,
  /// Liveness check.
  Ping,
  /// Drop every cached resource.
  ClearCache,
  /// Report memory and cache usage.
  CacheStatus,
}

impl Command {
  /// Whether `reply` is the last reply this command produces.
  pub fn completes_with(&self, reply: &Reply) -> bool {
    match reply {
      Reply::Success { .. } | Reply::Error { .. } | Reply::Crashed { .. } => true,
      Reply::CacheInfo { .. } => matches!(self, Command::ClearCache | Command::CacheStatus),
      Reply::Progress { .. } | Reply::ResourceLoaded { .. } => false,
    }
  }
}

/// A message emitted by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Reply {
  Progress {
    message: String,
  },
  /// A workflow document was loaded and validated.
  ResourceLoaded {
    name: String,
  },
  CacheInfo {
    info: CacheInfo,
  },
  Success {
    message: String,
    run_count: u64,
  },
  /// The command failed. The worker is still alive.
  Error {
    message: String,
    trace: String,
  },
  /// The worker failed outside command handling and has stopped.
  Crashed {
    message: String,
    trace: String,
  },
}

impl Reply {
  pub fn progress(message: impl Into<String>) -> Self {
    Reply::Progress {
      message: message.into(),
    }
  }

  /// Whether the reply ends the worker's life.
  pub fn is_terminal(&self) -> bool {
    matches!(self, Reply::Crashed { .. })
  }
}

/// Memory and cache snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheInfo {
  #[serde(flatten)]
  pub memory: DeviceMemory,
  pub run_count: u64,
  pub cached_resources: Vec<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub workflow: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_command_tags() {
    let command: Command = serde_json::from_value(json!({
      "type": "execute",
      "workflow_path": "flows/a.json",
      "arguments": { "prompt": "x" },
      "output_dir": "out"
    }))
    .unwrap();
    assert!(matches!(
      command,
      Command::Execute { ref arguments, log_level: None, .. } if arguments["prompt"] == "x"
    ));

    let command: Command = serde_json::from_value(json!({ "type": "clear-cache" })).unwrap();
    assert_eq!(command, Command::ClearCache);

    assert!(serde_json::from_value::<Command>(json!({ "type": "reboot" })).is_err());
  }

  #[test]
  fn test_reply_tags() {
    let reply = Reply::ResourceLoaded {
      name: "captions".to_string(),
    };
    assert_eq!(
      serde_json::to_value(&reply).unwrap(),
      json!({ "type": "resource-loaded", "name": "captions" })
    );

    let info = Reply::CacheInfo {
      info: CacheInfo {
        run_count: 2,
        ..CacheInfo::default()
      },
    };
    let value = serde_json::to_value(&info).unwrap();
    assert_eq!(value["type"], "cache-info");
    assert_eq!(value["info"]["run_count"], 2);
    assert_eq!(value["info"]["available"], false);
  }

  #[test]
  fn test_completion() {
    let success = Reply::Success {
      message: "done".to_string(),
      run_count: 1,
    };
    let info = Reply::CacheInfo {
      info: CacheInfo::default(),
    };

    assert!(Command::Ping.completes_with(&success));
    assert!(Command::CacheStatus.completes_with(&info));
    assert!(!Command::Ping.completes_with(&Reply::progress("working")));

    let execute = Command::Execute {
      workflow_path: "a.json".into(),
      arguments: BTreeMap::new(),
      output_dir: "out".into(),
      log_level: None,
    };
    assert!(!execute.completes_with(&info));
  }
}
