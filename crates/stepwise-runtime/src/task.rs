//! Built-in task commands.
//!
//! Tasks are small operations that run without a model: gathering inputs,
//! shaping messages, picking values out of earlier results, and handing raw
//! outputs back to a cached resource for post-processing.

use serde_json::{Map, Value, json};
use tracing::{debug, info};
use url::Url;

use crate::action_runtime::ActionError;
use crate::cache::ResourceCache;
use crate::error::RuntimeError;

/// The fixed registry of task commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskCommand {
  /// Return the arguments unchanged.
  GatherInputs,
  /// Collect image paths and URLs.
  GatherImages,
  /// Collect video paths and URLs.
  GatherVideos,
  /// Build a system/user chat message pair.
  FormatChatMessage,
  /// Look up `key` in `dict`.
  GetDictValue,
  /// Hand generated output back to a cached resource's post-processing entry point.
  BatchDecodePostProcess,
}

impl TaskCommand {
  const ALL: [TaskCommand; 6] = [
    TaskCommand::BatchDecodePostProcess,
    TaskCommand::FormatChatMessage,
    TaskCommand::GatherImages,
    TaskCommand::GatherInputs,
    TaskCommand::GatherVideos,
    TaskCommand::GetDictValue,
  ];

  pub fn name(self) -> &'static str {
    match self {
      TaskCommand::GatherInputs => "gather_inputs",
      TaskCommand::GatherImages => "gather_images",
      TaskCommand::GatherVideos => "gather_videos",
      TaskCommand::FormatChatMessage => "format_chat_message",
      TaskCommand::GetDictValue => "get_dict_value",
      TaskCommand::BatchDecodePostProcess => "batch_decode_post_process",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|command| command.name() == name)
  }

  /// Every registered command name, sorted.
  pub fn names() -> Vec<&'static str> {
    Self::ALL.iter().map(|command| command.name()).collect()
  }

  /// Look up a command, failing with the list of known commands.
  pub fn resolve(name: &str) -> Result<Self, RuntimeError> {
    Self::from_name(name).ok_or_else(|| RuntimeError::UnknownTask {
      command: name.to_string(),
      known: Self::names(),
    })
  }

  /// Run the command with one argument set.
  pub async fn run(
    self,
    arguments: Value,
    resource_reference: Option<&str>,
    cache: &ResourceCache,
  ) -> Result<Value, RuntimeError> {
    debug!(command = %self.name(), "running task");

    match self {
      TaskCommand::GatherInputs => Ok(arguments),
      TaskCommand::GatherImages => gather_media(self, &arguments, "images"),
      TaskCommand::GatherVideos => gather_media(self, &arguments, "videos"),
      TaskCommand::FormatChatMessage => {
        let args = object(self, &arguments)?;
        let system_prompt = required(self, args, "system_prompt")?;
        let user_message = required(self, args, "user_message")?;
        Ok(json!({
          "text_inputs": [
            { "role": "system", "content": system_prompt },
            { "role": "user", "content": user_message },
          ]
        }))
      }
      TaskCommand::GetDictValue => {
        let args = object(self, &arguments)?;
        let dict = required(self, args, "dict")?;
        let key = required(self, args, "key")?;
        let key = key.as_str().ok_or_else(|| invalid(self, "'key' must be a string"))?;
        Ok(dict.get(key).cloned().unwrap_or(Value::Null))
      }
      TaskCommand::BatchDecodePostProcess => {
        let reference = resource_reference
          .ok_or_else(|| invalid(self, "a resource_reference is required"))?;
        let resource = cache.get(reference).ok_or_else(|| RuntimeError::UnknownResource {
          name: reference.to_string(),
          available: cache.names(),
        })?;
        resource
          .post_process(arguments)
          .await
          .map_err(|source| RuntimeError::Action {
            action: self.name().to_string(),
            source,
          })
      }
    }
  }
}

/// Collect local paths matching `glob` followed by the validated `urls`.
fn gather_media(
  command: TaskCommand,
  arguments: &Value,
  label: &str,
) -> Result<Value, RuntimeError> {
  let args = object(command, arguments)?;
  let mut found = Vec::new();

  if let Some(pattern) = args.get("glob").and_then(Value::as_str) {
    debug!(pattern = %pattern, "searching for {label}");
    let paths = glob::glob(pattern)
      .map_err(|e| invalid(command, &format!("invalid glob '{pattern}': {e}")))?;
    for entry in paths {
      let path = entry.map_err(|e| RuntimeError::Io {
        path: e.path().to_path_buf(),
        source: e.into_error(),
      })?;
      found.push(Value::String(path.to_string_lossy().into_owned()));
    }
    info!(count = found.len(), "found local {label}");
  }

  if let Some(urls) = args.get("urls") {
    let urls = urls
      .as_array()
      .ok_or_else(|| invalid(command, "'urls' must be a list"))?;
    for url in urls {
      let text = url
        .as_str()
        .ok_or_else(|| invalid(command, "every url must be a string"))?;
      found.push(Value::String(validate_url(command, text)?));
    }
  }

  if found.is_empty() {
    return Err(RuntimeError::Action {
      action: command.name().to_string(),
      source: ActionError::Message(format!("No {label} found")),
    });
  }

  debug!(count = found.len(), "gathered {label}");
  Ok(Value::Array(found))
}

fn validate_url(command: TaskCommand, text: &str) -> Result<String, RuntimeError> {
  let url = Url::parse(text).map_err(|e| invalid(command, &format!("invalid url '{text}': {e}")))?;
  match url.scheme() {
    "http" | "https" if url.host().is_some() => Ok(url.to_string()),
    _ => Err(invalid(command, &format!("url '{text}' must use http or https"))),
  }
}

fn object(command: TaskCommand, arguments: &Value) -> Result<&Map<String, Value>, RuntimeError> {
  arguments
    .as_object()
    .ok_or_else(|| invalid(command, "arguments must be an object"))
}

fn required<'a>(
  command: TaskCommand,
  args: &'a Map<String, Value>,
  key: &str,
) -> Result<&'a Value, RuntimeError> {
  args
    .get(key)
    .ok_or_else(|| invalid(command, &format!("missing required argument '{key}'")))
}

fn invalid(command: TaskCommand, message: &str) -> RuntimeError {
  RuntimeError::InvalidArguments {
    action: command.name().to_string(),
    message: message.to_string(),
  }
}
