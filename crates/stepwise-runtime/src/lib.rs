//! Stepwise Runtime
//!
//! This crate executes workflow documents. A run proceeds step by step:
//!
//! 1. Variables are merged and substituted into a copy of the document.
//! 2. Each step is materialized into a [`StepAction`], building or reusing its
//!    resource through the [`ActionRuntime`].
//! 3. The step's argument template is expanded against the results of earlier
//!    steps ([`expand`]), and the action runs once per argument set.
//! 4. The step's [`StepResult`] is stored under its name and handed to the
//!    [`ResultSink`].
//!
//! The [`Orchestrator`] returns the last step's artifacts, which is what a
//! parent workflow receives from a nested one.

mod action;
mod action_runtime;
mod cache;
mod config;
mod document;
mod dry_run;
mod error;
mod expand;
mod orchestrator;
mod result;
mod sink;
mod step;
mod task;
mod variables;

pub use action::{BUILTIN_PREFIX, RunContext, StepAction, resolve_workflow_path};
pub use action_runtime::{
  ActionError, ActionRuntime, DeviceMemory, ReleaseLevel, Resource, ResourceHandle,
};
pub use cache::ResourceCache;
pub use config::RuntimeConfig;
pub use document::{DocumentValidator, StructuralValidator, WorkflowDocument};
pub use dry_run::DryRunRuntime;
pub use error::{ErrorKind, RuntimeError};
pub use expand::{expand, resolve_reference};
pub use orchestrator::Orchestrator;
pub use result::{ResultStore, StepResult};
pub use sink::{FsResultSink, MAX_BASE_NAME_LENGTH, NoopSink, ResultSink, SinkError};
pub use step::run_step;
pub use task::TaskCommand;
pub use variables::{coerce_value, merge_arguments, substitute};
