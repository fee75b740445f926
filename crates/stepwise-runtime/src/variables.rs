//! Workflow variables.
//!
//! Caller-supplied values are merged into a document's declared defaults and
//! every `variable:<name>` string in the document is replaced by the result.
//!
//! # Coercion
//! An incoming value takes the JSON type of the declared default. The strings
//! `"true"` and `"false"` (any case) become booleans before anything else. When
//! the conversion fails the incoming value is kept as is.
//!
//! This means the default decides the type of every override: a default of `0`
//! turns `"2.5"` into the string `"2.5"` rather than a float, and a default of
//! `false` turns any non-empty string into `true`. Documents relying on a
//! particular type should declare a default of that type.

use serde_json::{Map, Number, Value};
use stepwise_config::variable_name;
use tracing::debug;

use crate::error::RuntimeError;

/// Merge `arguments` into the declared `variables`, coercing each value to the
/// type of its default.
///
/// Supplying a value for an undeclared variable is an error.
pub fn merge_arguments(
  variables: &mut Map<String, Value>,
  arguments: &Map<String, Value>,
) -> Result<(), RuntimeError> {
  for (name, incoming) in arguments {
    let Some(default) = variables.get(name) else {
      return Err(RuntimeError::UnknownVariable {
        name: name.clone(),
        declared: variables.keys().cloned().collect(),
      });
    };

    let value = coerce_value(incoming, default);
    debug!(variable = %name, value = %value, "set workflow variable");
    variables.insert(name.clone(), value);
  }

  Ok(())
}

/// Replace every `variable:<name>` string inside `value`, recursively.
pub fn substitute(value: &mut Value, variables: &Map<String, Value>) -> Result<(), RuntimeError> {
  match value {
    Value::String(text) => {
      if let Some(name) = variable_name(text) {
        let replacement = variables
          .get(name)
          .ok_or_else(|| RuntimeError::UnknownVariable {
            name: name.to_string(),
            declared: variables.keys().cloned().collect(),
          })?;
        *value = replacement.clone();
      }
    }
    Value::Array(items) => {
      for item in items {
        substitute(item, variables)?;
      }
    }
    Value::Object(map) => {
      for (_, item) in map.iter_mut() {
        substitute(item, variables)?;
      }
    }
    _ => {}
  }

  Ok(())
}

/// Convert `incoming` to the JSON type of `default`.
pub fn coerce_value(incoming: &Value, default: &Value) -> Value {
  if let Some(flag) = incoming.as_str().and_then(parse_bool) {
    return Value::Bool(flag);
  }

  let coerced = match default {
    Value::Null => None,
    Value::Bool(_) => to_bool(incoming),
    Value::Number(number) if number.is_f64() => to_float(incoming),
    Value::Number(_) => to_integer(incoming),
    Value::String(_) => Some(Value::String(display(incoming))),
    Value::Array(_) => parse_json(incoming).filter(Value::is_array),
    Value::Object(_) => parse_json(incoming).filter(Value::is_object),
  };

  coerced.unwrap_or_else(|| incoming.clone())
}

fn parse_bool(text: &str) -> Option<bool> {
  if text.eq_ignore_ascii_case("true") {
    Some(true)
  } else if text.eq_ignore_ascii_case("false") {
    Some(false)
  } else {
    None
  }
}

fn to_bool(incoming: &Value) -> Option<Value> {
  let flag = match incoming {
    Value::Null => false,
    Value::Bool(flag) => *flag,
    Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
    Value::String(text) => !text.is_empty(),
    Value::Array(items) => !items.is_empty(),
    Value::Object(map) => !map.is_empty(),
  };
  Some(Value::Bool(flag))
}

fn to_integer(incoming: &Value) -> Option<Value> {
  match incoming {
    Value::Bool(flag) => Some(Value::from(i64::from(*flag))),
    Value::Number(number) => number
      .as_i64()
      .or_else(|| number.as_f64().map(|n| n.trunc() as i64))
      .map(Value::from),
    Value::String(text) => text.trim().parse::<i64>().ok().map(Value::from),
    _ => None,
  }
}

fn to_float(incoming: &Value) -> Option<Value> {
  let n = match incoming {
    Value::Bool(flag) => f64::from(u8::from(*flag)),
    Value::Number(number) => number.as_f64()?,
    Value::String(text) => text.trim().parse::<f64>().ok()?,
    _ => return None,
  };
  Number::from_f64(n).map(Value::Number)
}

fn display(incoming: &Value) -> String {
  match incoming {
    Value::String(text) => text.clone(),
    other => other.to_string(),
  }
}

fn parse_json(incoming: &Value) -> Option<Value> {
  match incoming {
    Value::String(text) => serde_json::from_str(text).ok(),
    other => Some(other.clone()),
  }
}
