use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::warn;

use stepwise_runtime::{
  DryRunRuntime, NoopSink, Orchestrator, ResourceCache, RuntimeConfig, WorkflowDocument,
};
use stepwise_worker::{Worker, WorkerConfig, serve_stdio};

mod logging;
mod repl;
mod settings;

use settings::Settings;

/// Stepwise - a declarative multi-step workflow runner
#[derive(Parser)]
#[command(name = "stepwise")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: $STEPWISE_HOME or ~/.stepwise)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a workflow once, in process
  Run {
    /// Path to the workflow file (JSON)
    workflow_file: PathBuf,

    /// Workflow arguments as name=value pairs
    arguments: Vec<String>,

    /// Directory for saved results
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `stepwise_runtime=trace`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Do not write step results to the output directory
    #[arg(long)]
    no_save: bool,
  },

  /// Serve the worker protocol on stdin/stdout
  Worker,

  /// Drive a persistent worker interactively
  Repl {
    /// Directory for saved results
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Log level requested for each run
    #[arg(short, long)]
    log_level: Option<String>,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => settings::default_data_dir()?,
  };
  let (settings, settings_error) = match Settings::load(&data_dir) {
    Ok(settings) => (settings, None),
    Err(e) => (Settings::default(), Some(e)),
  };

  let log_level = match &cli.command {
    Some(Commands::Run {
      log_level: Some(level),
      ..
    }) => level.clone(),
    _ => settings.log_level.clone(),
  };
  let log_hook = logging::init(&log_level);
  if let Some(e) = settings_error {
    warn!("using default settings: {e:#}");
  }

  let runtime_config = RuntimeConfig::new(data_dir.join("workflows"));

  match cli.command {
    Some(Commands::Run {
      workflow_file,
      arguments,
      output_dir,
      no_save,
      ..
    }) => {
      let output_dir = output_dir.unwrap_or_else(|| settings.output_dir.clone());
      let mut orchestrator = Orchestrator::new(Arc::new(DryRunRuntime::new()), runtime_config);
      if no_save {
        orchestrator = orchestrator.with_sink(Arc::new(NoopSink));
      }
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_workflow(&orchestrator, workflow_file, arguments, output_dir))
    }
    Some(Commands::Worker) => {
      let config = WorkerConfig {
        runtime: runtime_config,
        log_level_hook: Some(log_hook),
        ..WorkerConfig::default()
      };
      let rt = tokio::runtime::Runtime::new()?;
      let result = rt.block_on(async {
        let worker = Worker::new(Arc::new(DryRunRuntime::new()), config);
        serve_stdio(worker, tokio::io::stdin(), tokio::io::stdout()).await
      });

      // The blocking stdin reader would otherwise hold up runtime shutdown.
      let code = match result {
        Ok(()) => 0,
        Err(e) => {
          eprintln!("worker failed: {e}");
          1
        }
      };
      std::process::exit(code)
    }
    Some(Commands::Repl {
      output_dir,
      log_level,
    }) => {
      let output_dir = output_dir.unwrap_or_else(|| settings.output_dir.clone());
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(repl::run(&settings, &data_dir, output_dir, log_level))
    }
    None => {
      println!("stepwise - use --help to see available commands");
      Ok(())
    }
  }
}

async fn run_workflow(
  orchestrator: &Orchestrator,
  workflow_file: PathBuf,
  arguments: Vec<String>,
  output_dir: PathBuf,
) -> Result<()> {
  let arguments = parse_arguments(&arguments)?;

  let document = WorkflowDocument::load(&workflow_file)
    .await
    .with_context(|| format!("failed to load workflow file: {}", workflow_file.display()))?;

  orchestrator.validate(&document)?;
  eprintln!("Loaded workflow: {}", document.id());

  let arguments: Map<String, Value> = arguments
    .into_iter()
    .map(|(name, value)| (name, Value::String(value)))
    .collect();
  let mut cache = ResourceCache::new();
  let artifacts = orchestrator
    .run(&document, &arguments, &mut cache, &output_dir)
    .await
    .context("workflow execution failed")?;

  eprintln!("Workflow completed, results in {}", output_dir.display());
  println!("{}", serde_json::to_string_pretty(&artifacts)?);

  Ok(())
}

/// Parse `name=value` pairs. Values may contain `=`; names may not be empty.
pub(crate) fn parse_arguments(pairs: &[String]) -> Result<BTreeMap<String, String>> {
  let mut arguments = BTreeMap::new();
  for pair in pairs {
    let Some((name, value)) = pair.split_once('=') else {
      bail!("invalid argument '{pair}', expected name=value");
    };
    let name = name.trim();
    if name.is_empty() {
      bail!("invalid argument '{pair}', name is empty");
    }
    arguments.insert(name.to_string(), value.to_string());
  }
  Ok(arguments)
}
