use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::reference::ResultRef;

/// Arguments for a step action.
///
/// A sequence is used verbatim: every element is one argument set and no
/// reference expansion takes place. A mapping may contain result references
/// (see [`ResultRef`]) which the runtime expands into one argument set per
/// combination of referenced artifacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgumentTemplate {
  Sequence(Vec<Value>),
  Mapping(Map<String, Value>),
}

impl ArgumentTemplate {
  /// Result references in the order their keys appear in the mapping.
  ///
  /// Always empty for sequences.
  pub fn references(&self) -> Vec<(String, ResultRef)> {
    match self {
      ArgumentTemplate::Sequence(_) => Vec::new(),
      ArgumentTemplate::Mapping(map) => map
        .iter()
        .filter_map(|(key, value)| {
          value
            .as_str()
            .and_then(ResultRef::parse)
            .map(|reference| (key.clone(), reference))
        })
        .collect(),
    }
  }

  pub fn is_empty(&self) -> bool {
    match self {
      ArgumentTemplate::Sequence(items) => items.is_empty(),
      ArgumentTemplate::Mapping(map) => map.is_empty(),
    }
  }
}

impl Default for ArgumentTemplate {
  fn default() -> Self {
    ArgumentTemplate::Mapping(Map::new())
  }
}

impl From<Map<String, Value>> for ArgumentTemplate {
  fn from(map: Map<String, Value>) -> Self {
    ArgumentTemplate::Mapping(map)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_deserialize_mapping_and_sequence() {
    let mapping: ArgumentTemplate = serde_json::from_value(json!({ "prompt": "hi" })).unwrap();
    assert!(matches!(mapping, ArgumentTemplate::Mapping(_)));

    let sequence: ArgumentTemplate = serde_json::from_value(json!([{ "a": 1 }, 2])).unwrap();
    assert!(matches!(sequence, ArgumentTemplate::Sequence(ref items) if items.len() == 2));
  }

  #[test]
  fn test_references_keep_key_order() {
    let template: ArgumentTemplate = serde_json::from_value(json!({
      "steps": 20,
      "prompt": "previous_result:captions.text",
      "image": "previous_result:images",
      "label": "previous result: not a reference"
    }))
    .unwrap();

    let refs = template.references();
    assert_eq!(refs.len(), 2);
    assert_eq!(refs[0].0, "prompt");
    assert_eq!(refs[0].1.step, "captions");
    assert_eq!(refs[1].0, "image");
    assert_eq!(refs[1].1.field, None);
  }

  #[test]
  fn test_sequence_has_no_references() {
    let template = ArgumentTemplate::Sequence(vec![json!("previous_result:images")]);
    assert!(template.references().is_empty());
  }
}
