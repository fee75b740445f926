//! Stepwise Worker
//!
//! A long-lived process that keeps workflow resources resident between runs.
//!
//! The [`Worker`] receives [`Command`]s on one channel and emits [`Reply`]s on
//! another. It remembers the last workflow document it loaded, by path and
//! SHA-256 of its content, together with the resource cache that document
//! filled. Executing the same document again reuses those resources; a changed
//! document triggers a full cleanup first.
//!
//! Transports:
//! - [`WorkerHandle`] runs a worker on a tokio task in the same process.
//! - [`serve_stdio`] serves a worker over JSON lines, and [`WorkerProcess`]
//!   is the matching driver that spawns and supervises the child process.

mod error;
mod handle;
mod process;
mod protocol;
mod session;
mod stdio;
mod worker;

pub use error::{WorkerError, error_trace};
pub use handle::WorkerHandle;
pub use process::{ProcessConfig, WorkerProcess};
pub use protocol::{CacheInfo, Command, Reply};
pub use session::{Session, content_hash};
pub use stdio::serve_stdio;
pub use worker::{
  DEFAULT_MEMORY_GROWTH_WARNING_BYTES, Inbound, LogLevelHook, Worker, WorkerConfig, WorkerState,
};
