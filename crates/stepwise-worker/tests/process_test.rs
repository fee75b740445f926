//! Process driver tests against small shell stand-ins for the worker.

#![cfg(unix)]

use std::os::unix::process::ExitStatusExt;
use std::time::Duration;

use stepwise_worker::{Command, ProcessConfig, Reply, WorkerError, WorkerProcess};

const SIGTERM: i32 = 15;

fn config(program: &str, args: &[&str]) -> ProcessConfig {
  let mut config = ProcessConfig::new(program, args.iter().map(|a| a.to_string()).collect());
  config.result_timeout = Duration::from_millis(200);
  config.shutdown_timeout = Duration::from_millis(200);
  config.terminate_timeout = Duration::from_secs(5);
  config
}

fn shell(script: &str) -> ProcessConfig {
  config("sh", &["-c", script])
}

#[tokio::test]
async fn test_silent_worker_times_out_and_is_terminated() {
  let mut worker = WorkerProcess::spawn(config("sleep", &["30"])).unwrap();
  assert!(worker.is_alive());

  let err = worker.recv().await.unwrap_err();
  assert!(matches!(err, WorkerError::Timeout { .. }));

  // sleep ignores the shutdown line, so SIGTERM is what stops it.
  let status = worker.terminate().await.unwrap();
  assert_eq!(status.signal(), Some(SIGTERM));
  assert!(!worker.is_alive());
}

#[tokio::test]
async fn test_request_returns_final_reply() {
  let script = r#"read line
echo '{"type":"progress","message":"working"}'
echo '{"type":"success","message":"pong","run_count":0}'
exec sleep 30"#;
  let mut worker = WorkerProcess::spawn(shell(script)).unwrap();

  let mut seen = Vec::new();
  let reply = worker
    .request(Command::Ping, |reply| seen.push(reply.clone()))
    .await
    .unwrap();

  assert_eq!(seen, vec![Reply::progress("working")]);
  assert_eq!(
    reply,
    Reply::Success {
      message: "pong".to_string(),
      run_count: 0
    }
  );

  worker.terminate().await.unwrap();
}

#[tokio::test]
async fn test_worker_honouring_shutdown_exits_cleanly() {
  let mut worker = WorkerProcess::spawn(shell("read line; exit 0")).unwrap();

  let status = worker.terminate().await.unwrap();
  assert!(status.success());
}

#[tokio::test]
async fn test_exited_worker_is_detected() {
  let mut worker = WorkerProcess::spawn(config("true", &[])).unwrap();

  let err = worker.recv().await.unwrap_err();
  assert!(matches!(err, WorkerError::Closed));

  let status = worker.terminate().await.unwrap();
  assert!(status.success());
  assert!(!worker.is_alive());
}

#[tokio::test]
async fn test_malformed_reply_is_a_protocol_error() {
  let mut worker = WorkerProcess::spawn(shell("echo 'not json'; exec sleep 30")).unwrap();

  let err = worker.recv().await.unwrap_err();
  assert!(matches!(err, WorkerError::Protocol(_)));

  worker.terminate().await.unwrap();
}
