use stepwise_config::ResultDef;
use tracing::{debug, info};

use crate::action::{RunContext, StepAction};
use crate::cache::ResourceCache;
use crate::error::RuntimeError;
use crate::expand::expand;
use crate::result::{ResultStore, StepResult};

/// Run one step: expand its arguments and invoke the action once per argument set.
///
/// A step whose template expands to nothing produces an empty result. The
/// first failing iteration aborts the step.
pub async fn run_step(
  action: &StepAction,
  definition: &ResultDef,
  store: &ResultStore,
  cache: &ResourceCache,
  ctx: RunContext<'_>,
) -> Result<StepResult, RuntimeError> {
  let mut result = StepResult::new(definition.clone());

  let iterations = expand(action.argument_template(), store)?;
  if iterations.is_empty() {
    info!(step = %action.name(), "no argument sets produced, skipping step");
    return Ok(result);
  }

  let total = iterations.len();
  for (index, arguments) in iterations.into_iter().enumerate() {
    debug!(
      step = %action.name(),
      kind = %action.kind(),
      iteration = index + 1,
      total,
      "running iteration"
    );
    let output = action.run(arguments, cache, ctx).await?;
    result.push(output);
  }

  Ok(result)
}
