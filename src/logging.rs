use std::sync::Arc;

use stepwise_worker::LogLevelHook;
use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt, reload};

/// Install the global subscriber, writing to stderr.
///
/// The filter comes from `RUST_LOG` when set, else `default_level`. The
/// returned hook replaces the filter at runtime.
pub fn init(default_level: &str) -> LogLevelHook {
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  let (filter, handle) = reload::Layer::new(filter);

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .init();

  Arc::new(move |level: &str| match EnvFilter::try_new(level) {
    Ok(filter) => match handle.reload(filter) {
      Ok(()) => debug!(level, "log level changed"),
      Err(e) => warn!(level, error = %e, "failed to change log level"),
    },
    Err(e) => warn!(level, error = %e, "ignoring invalid log level"),
  })
}
