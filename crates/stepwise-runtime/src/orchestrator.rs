//! Workflow orchestrator.
//!
//! The [`Orchestrator`] is the main entry point for running a workflow
//! document. It substitutes variables into a copy of the document, turns each
//! step into a [`StepAction`], runs the steps in order, persists each result,
//! and returns the last step's artifacts.

use std::path::Path;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use stepwise_config::WorkflowDef;
use tracing::{Instrument, error, info, info_span};

use crate::action::{RunContext, StepAction};
use crate::action_runtime::ActionRuntime;
use crate::cache::ResourceCache;
use crate::config::RuntimeConfig;
use crate::document::{DocumentValidator, StructuralValidator, WorkflowDocument};
use crate::error::RuntimeError;
use crate::result::ResultStore;
use crate::sink::{FsResultSink, ResultSink};
use crate::step::run_step;
use crate::variables::{merge_arguments, substitute};

/// Runs workflow documents against an action runtime.
pub struct Orchestrator {
  runtime: Arc<dyn ActionRuntime>,
  sink: Arc<dyn ResultSink>,
  validator: Arc<dyn DocumentValidator>,
  config: RuntimeConfig,
}

impl Orchestrator {
  /// Create an orchestrator that persists results to disk and validates documents structurally.
  pub fn new(runtime: Arc<dyn ActionRuntime>, config: RuntimeConfig) -> Self {
    Self {
      runtime,
      sink: Arc::new(FsResultSink::new()),
      validator: Arc::new(StructuralValidator),
      config,
    }
  }

  pub fn with_sink(mut self, sink: Arc<dyn ResultSink>) -> Self {
    self.sink = sink;
    self
  }

  pub fn runtime(&self) -> &Arc<dyn ActionRuntime> {
    &self.runtime
  }

  pub fn config(&self) -> &RuntimeConfig {
    &self.config
  }

  /// Validate a document with the configured validator.
  pub fn validate(&self, document: &WorkflowDocument) -> Result<(), RuntimeError> {
    self
      .validator
      .validate(document)
      .map_err(|message| RuntimeError::InvalidDocument {
        path: document.path().to_path_buf(),
        message,
      })
  }

  /// Run a workflow document.
  ///
  /// `arguments` are merged into the document's declared variables. `cache`
  /// is borrowed for the run so resources created here stay available to the
  /// caller. The returned artifacts are those of the last step.
  pub fn run<'a>(
    &'a self,
    document: &'a WorkflowDocument,
    arguments: &'a Map<String, Value>,
    cache: &'a mut ResourceCache,
    output_dir: &'a Path,
  ) -> BoxFuture<'a, Result<Vec<Value>, RuntimeError>> {
    let execution_id = uuid::Uuid::new_v4().to_string();
    let span = info_span!(
      "workflow_run",
      workflow_id = %document.id(),
      execution_id = %execution_id,
    );

    Box::pin(
      async move {
        info!(path = %document.path().display(), "workflow_started");
        let result = self.run_steps(document, arguments, cache, output_dir).await;
        match &result {
          Ok(artifacts) => info!(artifacts = artifacts.len(), "workflow_completed"),
          Err(e) => error!(error = %e, "workflow_failed"),
        }
        result
      }
      .instrument(span),
    )
  }

  async fn run_steps(
    &self,
    document: &WorkflowDocument,
    arguments: &Map<String, Value>,
    cache: &mut ResourceCache,
    output_dir: &Path,
  ) -> Result<Vec<Value>, RuntimeError> {
    let workflow = self.prepare(document, arguments)?;
    let ctx = RunContext {
      orchestrator: self,
      document,
      output_dir,
    };

    let mut store = ResultStore::new();
    let mut last = None;

    for (index, step) in workflow.steps.iter().enumerate() {
      info!(
        step = %step.name,
        kind = %step.kind.label(),
        position = index + 1,
        total = workflow.steps.len(),
        "step_started"
      );

      let action = StepAction::materialize(step, cache, ctx)
        .await
        .map_err(|e| e.in_step(&step.name))?;
      let result = run_step(&action, &step.result, &store, cache, ctx)
        .await
        .map_err(|e| e.in_step(&step.name))?;

      let base_name = format!("{}-{}.{}", workflow.id, step.name, index);
      self
        .sink
        .save(&result, output_dir, &base_name)
        .await
        .map_err(|e| RuntimeError::from(e).in_step(&step.name))?;

      info!(step = %step.name, outputs = result.outputs().len(), "step_completed");
      store.insert(step.name.clone(), result);
      last = Some(step.name.as_str());
    }

    Ok(
      last
        .and_then(|name| store.get(name))
        .map(|result| result.artifacts())
        .unwrap_or_default(),
    )
  }

  /// Substitute variables into a copy of the document and interpret it.
  fn prepare(
    &self,
    document: &WorkflowDocument,
    arguments: &Map<String, Value>,
  ) -> Result<WorkflowDef, RuntimeError> {
    let mut source = document.source().clone();

    if let Some(declared) = document.variables() {
      let mut variables = declared.clone();
      merge_arguments(&mut variables, arguments)?;
      substitute(&mut source, &variables)?;
    } else if !arguments.is_empty() {
      info!(count = arguments.len(), "workflow declares no variables, ignoring arguments");
    }

    serde_json::from_value(source).map_err(|e| RuntimeError::InvalidDocument {
      path: document.path().to_path_buf(),
      message: e.to_string(),
    })
  }
}
