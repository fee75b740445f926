//! Iteration expansion.
//!
//! Turns a step's argument template into the concrete argument sets the step
//! runs with, by expanding `previous_result:` references against the results
//! of earlier steps.
//!
//! # Example
//!
//! With a store holding `images = ["a.png", "b.png"]` and
//! `captions = [{"text": "x"}, {"text": "y"}]`, the template
//!
//! ```json
//! { "image": "previous_result:images", "prompt": "previous_result:captions.text", "steps": 20 }
//! ```
//!
//! expands to four argument sets, the last key varying fastest:
//!
//! ```json
//! { "image": "a.png", "prompt": "x", "steps": 20 }
//! { "image": "a.png", "prompt": "y", "steps": 20 }
//! { "image": "b.png", "prompt": "x", "steps": 20 }
//! { "image": "b.png", "prompt": "y", "steps": 20 }
//! ```

use serde_json::{Map, Value};
use stepwise_config::{ArgumentTemplate, ResultRef};
use tracing::debug;

use crate::error::RuntimeError;
use crate::result::ResultStore;

/// Expand an argument template into argument sets.
///
/// - A sequence template is returned element by element, unexpanded.
/// - A mapping without references yields exactly one copy of itself.
/// - Otherwise the cartesian product of all referenced value lists is taken,
///   in the order the reference keys appear in the template.
///
/// Referencing a step that has no result is a configuration error.
pub fn expand(
  template: &ArgumentTemplate,
  store: &ResultStore,
) -> Result<Vec<Value>, RuntimeError> {
  let map = match template {
    ArgumentTemplate::Sequence(items) => {
      debug!(count = items.len(), "using sequence template as-is");
      return Ok(items.clone());
    }
    ArgumentTemplate::Mapping(map) => map,
  };

  let references = template.references();
  if references.is_empty() {
    debug!("no result references found in template");
    return Ok(vec![Value::Object(map.clone())]);
  }

  debug!(count = references.len(), "found result references");

  let mut candidates = Vec::with_capacity(references.len());
  for (key, reference) in references {
    let values = resolve_reference(&reference, store)?;
    candidates.push((key, values));
  }

  let iterations: Vec<Value> = cartesian_product(map, &candidates)
    .into_iter()
    .map(Value::Object)
    .collect();

  debug!(count = iterations.len(), "generated argument combinations");
  Ok(iterations)
}

/// Resolve one reference to its ordered candidate values.
pub fn resolve_reference(
  reference: &ResultRef,
  store: &ResultStore,
) -> Result<Vec<Value>, RuntimeError> {
  let result = store
    .get(&reference.step)
    .ok_or_else(|| RuntimeError::UnknownResult {
      reference: reference.step.clone(),
      available: store.names(),
    })?;

  Ok(match &reference.field {
    Some(field) => result.values_of(field),
    None => result.artifacts(),
  })
}

/// Build one copy of `template` per combination of candidate values.
fn cartesian_product(
  template: &Map<String, Value>,
  candidates: &[(String, Vec<Value>)],
) -> Vec<Map<String, Value>> {
  let mut partials = vec![template.clone()];

  for (key, values) in candidates {
    let mut next = Vec::with_capacity(partials.len() * values.len());
    for partial in &partials {
      for value in values {
        let mut arguments = partial.clone();
        arguments.insert(key.clone(), value.clone());
        next.push(arguments);
      }
    }
    partials = next;
  }

  partials
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::result::StepResult;
  use serde_json::json;

  fn template(value: Value) -> ArgumentTemplate {
    serde_json::from_value(value).unwrap()
  }

  fn store(entries: Vec<(&str, Vec<Value>)>) -> ResultStore {
    entries
      .into_iter()
      .map(|(name, outputs)| (name.to_string(), StepResult::from_outputs(outputs)))
      .collect()
  }

  #[test]
  fn test_identity_expansion() {
    let t = template(json!({ "prompt": "a marmot", "steps": 20, "nested": { "a": [1, 2] } }));
    let result = expand(&t, &ResultStore::new()).unwrap();

    assert_eq!(
      result,
      vec![json!({ "prompt": "a marmot", "steps": 20, "nested": { "a": [1, 2] } })]
    );
  }

  #[test]
  fn test_simple_reference() {
    let s = store(vec![("images", vec![json!(["a.png", "b.png"])])]);
    let t = template(json!({ "image": "previous_result:images" }));

    let result = expand(&t, &s).unwrap();
    assert_eq!(result, vec![json!({ "image": "a.png" }), json!({ "image": "b.png" })]);
  }

  #[test]
  fn test_dotted_field() {
    let s = store(vec![("step1", vec![json!({ "text": "x" }), json!({ "text": "y" })])]);
    let t = template(json!({ "prompt": "previous_result:step1.text" }));

    let result = expand(&t, &s).unwrap();
    assert_eq!(result, vec![json!({ "prompt": "x" }), json!({ "prompt": "y" })]);
  }

  #[test]
  fn test_missing_reference() {
    let s = store(vec![("images", vec![json!("a.png")])]);
    let t = template(json!({ "image": "previous_result:nope" }));

    let err = expand(&t, &s).unwrap_err();
    assert!(matches!(
      err,
      RuntimeError::UnknownResult { ref reference, .. } if reference == "nope"
    ));
    assert!(err.to_string().contains("nope"));
  }

  #[test]
  fn test_cartesian_product() {
    let s = store(vec![
      ("images", vec![json!(["a.png", "b.png"])]),
      ("captions", vec![json!({ "text": "x" }), json!({ "text": "y" }), json!({ "text": "z" })]),
    ]);
    let t = template(json!({
      "image": "previous_result:images",
      "steps": 4,
      "prompt": "previous_result:captions.text"
    }));

    let result = expand(&t, &s).unwrap();
    assert_eq!(result.len(), 6);

    let mut seen = Vec::new();
    for arguments in &result {
      assert_eq!(arguments["steps"], 4);
      let pair = (arguments["image"].clone(), arguments["prompt"].clone());
      assert!(!seen.contains(&pair), "duplicate combination {pair:?}");
      seen.push(pair);
    }

    assert_eq!(result[0], json!({ "image": "a.png", "steps": 4, "prompt": "x" }));
    assert_eq!(result[1], json!({ "image": "a.png", "steps": 4, "prompt": "y" }));
    assert_eq!(result[3], json!({ "image": "b.png", "steps": 4, "prompt": "x" }));
  }

  #[test]
  fn test_key_order_is_preserved() {
    let s = store(vec![("images", vec![json!("a.png")])]);
    let t = template(json!({ "first": 1, "image": "previous_result:images", "last": 2 }));

    let result = expand(&t, &s).unwrap();
    let keys: Vec<&String> = result[0].as_object().unwrap().keys().collect();
    assert_eq!(keys, vec!["first", "image", "last"]);
  }

  #[test]
  fn test_stable_ordering() {
    let s = store(vec![
      ("a", vec![json!([1, 2, 3])]),
      ("b", vec![json!(["x", "y"])]),
    ]);
    let t = template(json!({ "b": "previous_result:b", "a": "previous_result:a" }));

    let first = expand(&t, &s).unwrap();
    for _ in 0..10 {
      assert_eq!(expand(&t, &s).unwrap(), first);
    }
  }

  #[test]
  fn test_empty_reference_yields_no_iterations() {
    let s = store(vec![("captions", vec![json!({ "other": 1 })])]);
    let t = template(json!({ "prompt": "previous_result:captions.text" }));

    assert!(expand(&t, &s).unwrap().is_empty());
  }

  #[test]
  fn test_sequence_template_is_not_expanded() {
    let s = store(vec![("images", vec![json!("a.png")])]);
    let t = ArgumentTemplate::Sequence(vec![json!({ "image": "previous_result:images" }), json!(7)]);

    let result = expand(&t, &s).unwrap();
    assert_eq!(result, vec![json!({ "image": "previous_result:images" }), json!(7)]);
  }
}
