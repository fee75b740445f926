//! Interactive driver for a persistent worker process.
//!
//! The REPL remembers the loaded workflow and the argument values set for it,
//! so repeated runs only need `run`.

use std::collections::BTreeMap;
use std::io::Write;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use stepwise_runtime::{DocumentValidator, StructuralValidator, WorkflowDocument};
use stepwise_worker::{CacheInfo, Command, ProcessConfig, Reply, WorkerError, WorkerProcess};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::parse_arguments;
use crate::settings::Settings;

const HELP: &str = "\
commands:
  workflow load <file>         load a workflow (a path, or a name in the workflow directory)
  workflow reload              reload the current workflow from disk
  workflow status              show the current workflow
  workflow run [name=value]    run the current workflow
  arg show                     show declared variables and current argument values
  arg set <name>=<value>       set an argument for later runs
  arg clear                    clear all argument values
  run [<file>] [name=value]    load a workflow if given, then run it
  status                       show memory and cache usage
  clear                        drop every cached resource
  ping                         check that the worker is alive
  restart                      restart the worker process
  quit                         stop the worker and exit";

const MIB: f64 = 1024.0 * 1024.0;

pub async fn run(
  settings: &Settings,
  data_dir: &Path,
  output_dir: PathBuf,
  log_level: Option<String>,
) -> Result<()> {
  let program = std::env::current_exe().context("failed to locate the stepwise executable")?;
  let mut config = ProcessConfig::new(
    program,
    vec![
      "--data-dir".to_string(),
      data_dir.display().to_string(),
      "worker".to_string(),
    ],
  );
  config.result_timeout = settings.result_timeout();
  config.shutdown_timeout = settings.shutdown_timeout();
  config.terminate_timeout = settings.terminate_timeout();

  let mut repl = Repl {
    config,
    output_dir,
    log_level,
    selection: Selection::new(data_dir.join("workflows")),
    worker: None,
  };

  println!("stepwise repl - type 'help' for commands");
  let mut lines = BufReader::new(tokio::io::stdin()).lines();
  loop {
    print!("> ");
    std::io::stdout().flush()?;

    let Some(line) = lines.next_line().await? else {
      break;
    };
    match repl.dispatch(line.trim()).await {
      Ok(ControlFlow::Continue(())) => {}
      Ok(ControlFlow::Break(())) => break,
      Err(e) => eprintln!("error: {e:#}"),
    }
  }

  repl.stop().await;
  Ok(())
}

/// The loaded workflow and the argument values set for it.
struct Selection {
  workflow_dir: PathBuf,
  document: Option<WorkflowDocument>,
  arguments: BTreeMap<String, String>,
}

impl Selection {
  fn new(workflow_dir: PathBuf) -> Self {
    Self {
      workflow_dir,
      document: None,
      arguments: BTreeMap::new(),
    }
  }

  fn document(&self) -> Result<&WorkflowDocument> {
    self
      .document
      .as_ref()
      .ok_or_else(|| anyhow!("no workflow loaded, use 'workflow load <file>' first"))
  }

  /// Load and validate a workflow. Arguments are kept only when the same file
  /// is loaded again.
  async fn load(&mut self, file: &str) -> Result<&WorkflowDocument> {
    let path = resolve_workflow_file(file, &self.workflow_dir);
    let document = load_validated(&path).await?;

    if self.document.as_ref().map(WorkflowDocument::path) != Some(path.as_path()) {
      self.arguments.clear();
    }
    Ok(&*self.document.insert(document))
  }

  async fn reload(&mut self) -> Result<&WorkflowDocument> {
    let path = self.document()?.path().to_path_buf();
    let document = load_validated(&path).await?;
    Ok(&*self.document.insert(document))
  }

  /// Store an argument value. The name must be a declared variable.
  fn set_argument(&mut self, pair: &str) -> Result<(String, String)> {
    let document = self.document()?;
    let (name, value) = parse_arguments(&[pair.to_string()])?
      .pop_first()
      .context("usage: arg set <name>=<value>")?;
    let declared = document.variables().is_some_and(|vars| vars.contains_key(&name));
    if !declared {
      bail!("'{name}' is not a declared variable of workflow '{}'", document.id());
    }
    self.arguments.insert(name.clone(), value.clone());
    Ok((name, value))
  }

  fn clear_arguments(&mut self) {
    self.arguments.clear();
  }

  /// An `execute` command for the loaded workflow. `overrides` win over the
  /// stored arguments for this run only.
  fn execute(
    &self,
    overrides: BTreeMap<String, String>,
    output_dir: &Path,
    log_level: Option<String>,
  ) -> Result<Command> {
    let document = self.document()?;
    let mut arguments = self.arguments.clone();
    arguments.extend(overrides);
    Ok(Command::Execute {
      workflow_path: document.path().to_path_buf(),
      arguments,
      output_dir: output_dir.to_path_buf(),
      log_level,
    })
  }

  fn print_arguments(&self) -> Result<()> {
    let document = self.document()?;
    println!("variables of '{}' and their defaults:", document.id());
    match document.variables() {
      Some(variables) if !variables.is_empty() => {
        for (name, default) in variables {
          println!("  {name}: {default}");
        }
      }
      _ => println!("  none declared"),
    }

    println!("current argument values:");
    if self.arguments.is_empty() {
      println!("  none set");
    }
    for (name, value) in &self.arguments {
      println!("  {name}={value}");
    }
    Ok(())
  }
}

async fn load_validated(path: &Path) -> Result<WorkflowDocument> {
  let document = WorkflowDocument::load(path).await?;
  StructuralValidator
    .validate(&document)
    .map_err(|message| anyhow!("invalid workflow {}: {message}", path.display()))?;
  Ok(document)
}

/// Resolve a `workflow load` argument.
///
/// Absolute paths, paths starting with `./` or `../`, and paths that exist are
/// used as given. Anything else names a file in `workflow_dir`, with `.json`
/// added when missing.
fn resolve_workflow_file(file: &str, workflow_dir: &Path) -> PathBuf {
  let path = Path::new(file);
  if path.is_absolute() || file.starts_with("./") || file.starts_with("../") || path.exists() {
    return path.to_path_buf();
  }
  if path.extension().is_some_and(|ext| ext == "json") {
    workflow_dir.join(path)
  } else {
    workflow_dir.join(format!("{file}.json"))
  }
}

struct Repl {
  config: ProcessConfig,
  output_dir: PathBuf,
  log_level: Option<String>,
  selection: Selection,
  worker: Option<WorkerProcess>,
}

impl Repl {
  async fn dispatch(&mut self, line: &str) -> Result<ControlFlow<()>> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
      return Ok(ControlFlow::Continue(()));
    };
    let rest: Vec<&str> = words.collect();

    match verb {
      "workflow" => self.workflow(&rest).await?,
      "arg" => self.arg(&rest)?,
      "run" => {
        let overrides = match rest.split_first() {
          Some((file, pairs)) if !file.contains('=') => {
            let document = self.selection.load(file).await?;
            println!("loaded workflow '{}'", document.id());
            pairs
          }
          _ => rest.as_slice(),
        };
        self.run_loaded(overrides).await?;
      }
      "status" => self.request(Command::CacheStatus).await?,
      "clear" => self.request(Command::ClearCache).await?,
      "ping" => self.request(Command::Ping).await?,
      "restart" => {
        self.stop().await;
        self.ensure_worker()?;
        println!("worker restarted");
      }
      "quit" | "exit" => return Ok(ControlFlow::Break(())),
      "help" | "?" => println!("{HELP}"),
      other => println!("unknown command '{other}'\n{HELP}"),
    }

    Ok(ControlFlow::Continue(()))
  }

  async fn workflow(&mut self, args: &[&str]) -> Result<()> {
    match args {
      ["load", file] => {
        let document = self.selection.load(file).await?;
        println!("loaded workflow '{}' from {}", document.id(), document.path().display());
      }
      ["reload"] => {
        let document = self.selection.reload().await?;
        println!("reloaded workflow '{}'", document.id());
      }
      ["status"] => match &self.selection.document {
        Some(document) => {
          println!("current workflow: {}", document.id());
          println!("file: {}", document.path().display());
        }
        None => println!("no workflow loaded"),
      },
      ["run", pairs @ ..] => self.run_loaded(pairs).await?,
      _ => println!("{HELP}"),
    }
    Ok(())
  }

  fn arg(&mut self, args: &[&str]) -> Result<()> {
    match args {
      [] | ["show"] => self.selection.print_arguments()?,
      ["set", words @ ..] if !words.is_empty() => {
        let (name, value) = self.selection.set_argument(&words.join(" "))?;
        println!("set argument {name}={value}");
      }
      ["clear"] => {
        self.selection.clear_arguments();
        println!("all workflow arguments cleared");
      }
      _ => println!("{HELP}"),
    }
    Ok(())
  }

  async fn run_loaded(&mut self, pairs: &[&str]) -> Result<()> {
    let pairs: Vec<String> = pairs.iter().map(|pair| pair.to_string()).collect();
    let overrides = parse_arguments(&pairs)?;
    let command = self
      .selection
      .execute(overrides, &self.output_dir, self.log_level.clone())?;
    self.request(command).await
  }

  /// The running worker, started on demand.
  fn ensure_worker(&mut self) -> Result<&mut WorkerProcess> {
    if !self.worker.as_mut().is_some_and(|worker| worker.is_alive()) {
      let worker = WorkerProcess::spawn(self.config.clone())?;
      info!(pid = worker.id(), "worker started");
      self.worker = Some(worker);
    }
    self.worker.as_mut().context("worker is not running")
  }

  async fn request(&mut self, command: Command) -> Result<()> {
    let worker = self.ensure_worker()?;
    let outcome = worker.request(command, print_reply).await;

    match outcome {
      Ok(reply) if reply.is_terminal() => {
        print_reply(&reply);
        eprintln!("the worker will be restarted on the next command");
        self.stop().await;
      }
      Ok(reply) => print_reply(&reply),
      Err(e @ WorkerError::Timeout { .. }) => {
        eprintln!("{e}, terminating the worker");
        self.stop().await;
      }
      Err(e) => {
        self.stop().await;
        return Err(e).context("lost contact with the worker");
      }
    }
    Ok(())
  }

  /// Terminate the worker, if one is running.
  async fn stop(&mut self) {
    let Some(mut worker) = self.worker.take() else {
      return;
    };
    match worker.terminate().await {
      Ok(status) => info!(%status, "worker stopped"),
      Err(e) => warn!(error = %e, "failed to stop worker"),
    }
  }
}

fn print_reply(reply: &Reply) {
  match reply {
    Reply::Progress { message } => println!("  {message}"),
    Reply::ResourceLoaded { name } => println!("  loaded workflow '{name}'"),
    Reply::CacheInfo { info } => print_cache_info(info),
    Reply::Success { message, run_count } => println!("{message} (runs: {run_count})"),
    Reply::Error { message, trace } => eprintln!("{message}\n{trace}"),
    Reply::Crashed { message, trace } => eprintln!("worker crashed: {message}\n{trace}"),
  }
}

fn print_cache_info(info: &CacheInfo) {
  let memory = &info.memory;
  if memory.available {
    println!(
      "  device: {} allocated {:.1} MiB, reserved {:.1} MiB, free {:.1} MiB",
      memory.device_name.as_deref().unwrap_or("unknown"),
      memory.allocated_bytes as f64 / MIB,
      memory.reserved_bytes as f64 / MIB,
      memory.free_bytes as f64 / MIB,
    );
  } else {
    println!("  device: none");
  }
  println!(
    "  workflow: {}, runs: {}, cached resources: [{}]",
    info.workflow.as_deref().unwrap_or("none"),
    info.run_count,
    info.cached_resources.join(", "),
  );
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::TempDir;

  fn write_workflow(dir: &Path, name: &str, id: &str) -> PathBuf {
    let path = dir.join(name);
    let document = json!({
      "id": id,
      "variables": { "prompt": "a marmot", "count": 1 },
      "steps": [{ "name": "echo", "task": { "command": "gather_inputs", "arguments": {} } }]
    });
    std::fs::write(&path, document.to_string()).unwrap();
    path
  }

  #[test]
  fn test_resolve_workflow_file() {
    let workflows = Path::new("/data/workflows");

    assert_eq!(
      resolve_workflow_file("caption", workflows),
      PathBuf::from("/data/workflows/caption.json")
    );
    assert_eq!(
      resolve_workflow_file("caption.json", workflows),
      PathBuf::from("/data/workflows/caption.json")
    );
    assert_eq!(
      resolve_workflow_file("./flows/a.json", workflows),
      PathBuf::from("./flows/a.json")
    );
    assert_eq!(resolve_workflow_file("/abs/a.json", workflows), PathBuf::from("/abs/a.json"));
  }

  #[tokio::test]
  async fn test_arguments_persist_across_runs() {
    let dir = TempDir::new().unwrap();
    let path = write_workflow(dir.path(), "caption.json", "caption");
    let mut selection = Selection::new(dir.path().to_path_buf());

    selection.load(path.to_str().unwrap()).await.unwrap();
    selection.set_argument("prompt=a heron").unwrap();

    let out = dir.path().join("out");
    for _ in 0..2 {
      let Command::Execute {
        workflow_path,
        arguments,
        ..
      } = selection.execute(BTreeMap::new(), &out, None).unwrap()
      else {
        panic!("expected an execute command");
      };
      assert_eq!(workflow_path, path);
      assert_eq!(arguments["prompt"], "a heron");
    }

    let overrides = BTreeMap::from([("prompt".to_string(), "a crane".to_string())]);
    let Command::Execute { arguments, .. } = selection.execute(overrides, &out, None).unwrap()
    else {
      panic!("expected an execute command");
    };
    assert_eq!(arguments["prompt"], "a crane");
    assert_eq!(selection.arguments["prompt"], "a heron");
  }

  #[tokio::test]
  async fn test_only_declared_variables_can_be_set() {
    let dir = TempDir::new().unwrap();
    write_workflow(dir.path(), "caption.json", "caption");
    let mut selection = Selection::new(dir.path().to_path_buf());

    assert!(selection.set_argument("prompt=x").is_err());

    selection.load("caption").await.unwrap();
    let err = selection.set_argument("seed=7").unwrap_err();
    assert!(err.to_string().contains("'seed'"));
    assert!(selection.set_argument("not a pair").is_err());
    assert!(selection.arguments.is_empty());
  }

  #[tokio::test]
  async fn test_loading_another_workflow_clears_arguments() {
    let dir = TempDir::new().unwrap();
    write_workflow(dir.path(), "a.json", "a");
    write_workflow(dir.path(), "b.json", "b");
    let mut selection = Selection::new(dir.path().to_path_buf());

    selection.load("a").await.unwrap();
    selection.set_argument("count=3").unwrap();

    selection.load("a").await.unwrap();
    assert_eq!(selection.arguments["count"], "3");

    selection.reload().await.unwrap();
    assert_eq!(selection.arguments["count"], "3");

    let document = selection.load("b").await.unwrap();
    assert_eq!(document.id(), "b");
    assert!(selection.arguments.is_empty());
  }

  #[tokio::test]
  async fn test_invalid_workflow_is_not_loaded() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("broken.json"), r#"{ "id": "broken" }"#).unwrap();
    let mut selection = Selection::new(dir.path().to_path_buf());

    assert!(selection.load("broken").await.is_err());
    assert!(selection.document.is_none());
    assert!(selection.execute(BTreeMap::new(), dir.path(), None).is_err());
  }
}
