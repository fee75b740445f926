//! Reference mini-language used inside documents.
//!
//! - `previous_result:<step>` / `previous_result:<step>.<field>` inside an
//!   argument template names the artifacts of an earlier step.
//! - `variable:<name>` anywhere in a document is replaced by the value of a
//!   workflow variable before the document is interpreted.

use std::fmt;

/// Prefix marking a result reference in an argument template.
pub const PREVIOUS_RESULT_PREFIX: &str = "previous_result:";

/// Prefix marking a variable reference in a workflow document.
pub const VARIABLE_PREFIX: &str = "variable:";

/// A parsed `previous_result:` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultRef {
  /// Name of the step whose result is referenced.
  pub step: String,
  /// Optional field extracted from each artifact.
  pub field: Option<String>,
}

impl ResultRef {
  /// Parse a template value. Returns `None` when the value is not a result reference.
  pub fn parse(value: &str) -> Option<Self> {
    let target = value.strip_prefix(PREVIOUS_RESULT_PREFIX)?;
    let reference = match target.split_once('.') {
      Some((step, field)) => Self {
        step: step.to_string(),
        field: Some(field.to_string()),
      },
      None => Self {
        step: target.to_string(),
        field: None,
      },
    };
    Some(reference)
  }
}

impl fmt::Display for ResultRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.field {
      Some(field) => write!(f, "{}.{}", self.step, field),
      None => write!(f, "{}", self.step),
    }
  }
}

/// Return the variable name if `value` is a `variable:` reference.
pub fn variable_name(value: &str) -> Option<&str> {
  value.strip_prefix(VARIABLE_PREFIX)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_bare_step() {
    let reference = ResultRef::parse("previous_result:images").unwrap();
    assert_eq!(reference.step, "images");
    assert_eq!(reference.field, None);
  }

  #[test]
  fn test_parse_dotted_field() {
    let reference = ResultRef::parse("previous_result:step1.text").unwrap();
    assert_eq!(reference.step, "step1");
    assert_eq!(reference.field.as_deref(), Some("text"));
    assert_eq!(reference.to_string(), "step1.text");
  }

  #[test]
  fn test_parse_plain_string() {
    assert_eq!(ResultRef::parse("a marmot in the snow"), None);
    assert_eq!(ResultRef::parse("images"), None);
  }

  #[test]
  fn test_variable_name() {
    assert_eq!(variable_name("variable:prompt"), Some("prompt"));
    assert_eq!(variable_name("prompt"), None);
  }
}
