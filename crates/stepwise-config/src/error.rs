use thiserror::Error;

/// Errors raised while interpreting a step definition.
#[derive(Debug, Error, PartialEq)]
pub enum StepDefError {
  #[error(
    "step '{name}' must declare exactly one of resource, resource_reference, workflow, task \
     (found {found})"
  )]
  AmbiguousKind { name: String, found: usize },
}
