//! Sandbox integration tests
//!
//! Exercises loading, deadline enforcement, crash reporting and host
//! callbacks against real worker processes.

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metaopt::domain::errors::{LoadError, SandboxError};
use metaopt::domain::ports::{HostCapabilities, NoCapabilities};
use metaopt::services::sandbox::Invocation;
use serde_json::{json, Value};

#[derive(Default)]
struct RecordingHost {
    calls: Mutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl HostCapabilities for RecordingHost {
    async fn call(&self, target: &str, method: &str, params: Value) -> Result<Value, String> {
        self.calls
            .lock()
            .unwrap()
            .push((target.to_string(), method.to_string(), params));
        match (target, method) {
            ("utility", "score") => Ok(json!(0.5)),
            _ => Err(format!("no {target}.{method}")),
        }
    }
}

#[tokio::test]
async fn test_raw_worker_returns_result() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());
    let program = executor
        .load(
            "read -r line\necho 'starting up'\necho '{\"type\":\"result\",\"value\":{\"answer\":42}}'\n",
            "algorithm",
        )
        .await
        .unwrap();

    let value = executor
        .invoke(Arc::new(program), Invocation::new(), Arc::new(NoCapabilities), None)
        .await
        .unwrap();
    assert_eq!(value, json!({"answer": 42}));
}

#[tokio::test]
async fn test_deadline_abandons_worker_promptly() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());
    let program = executor
        .load("read -r line\nsleep 5\n", "algorithm")
        .await
        .unwrap();

    let started = Instant::now();
    let err = executor
        .invoke(
            Arc::new(program),
            Invocation::new(),
            Arc::new(NoCapabilities),
            Some(Duration::from_millis(100)),
        )
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(
        started.elapsed() < Duration::from_millis(200),
        "timeout took {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_worker_exit_without_result_is_a_crash() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());
    let program = executor
        .load("read -r line\necho 'segfault imminent' >&2\nexit 3\n", "algorithm")
        .await
        .unwrap();

    let err = executor
        .invoke(Arc::new(program), Invocation::new(), Arc::new(NoCapabilities), None)
        .await
        .unwrap_err();
    match err {
        SandboxError::Crashed { status, stderr } => {
            assert_eq!(status, Some(3));
            assert!(stderr.contains("segfault imminent"));
        }
        other => panic!("expected crash, got {other:?}"),
    }
}

#[tokio::test]
async fn test_worker_error_messages_map_to_sandbox_errors() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());

    let raised = executor
        .load(
            "read -r line\necho '{\"type\":\"error\",\"kind\":\"raised\",\"message\":\"ValueError: bad\"}'\n",
            "algorithm",
        )
        .await
        .unwrap();
    let err = executor
        .invoke(Arc::new(raised), Invocation::new(), Arc::new(NoCapabilities), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Raised(ref msg) if msg == "ValueError: bad"));

    let missing = executor
        .load(
            "read -r line\necho '{\"type\":\"error\",\"kind\":\"load\",\"message\":\"no improve_algorithm\"}'\n",
            "improve_algorithm",
        )
        .await
        .unwrap();
    let err = executor
        .invoke(Arc::new(missing), Invocation::new(), Arc::new(NoCapabilities), None)
        .await
        .unwrap_err();
    assert!(matches!(err, SandboxError::Load(LoadError::Import { .. })));
}

#[tokio::test]
async fn test_callbacks_are_answered_in_order() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());
    let script = r#"read -r invoke
echo '{"type":"call","id":1,"target":"utility","method":"score","params":{"text":"abc"}}'
read -r first
echo '{"type":"call","id":2,"target":"language_model","method":"prompt","params":{"message":"hi"}}'
read -r second
case "$second" in
  *'"error"'*) outcome=refused ;;
  *) outcome=answered ;;
esac
score=$(printf '%s\n' "$first" | sed -n 's/.*"ok":\([0-9.]*\).*/\1/p')
printf '{"type":"result","value":{"score":%s,"prompt":"%s"}}\n' "$score" "$outcome"
"#;
    let program = executor.load(script, "improve_algorithm").await.unwrap();
    let host = Arc::new(RecordingHost::default());

    let value = executor
        .invoke(
            Arc::new(program),
            Invocation::new().arg("candidate"),
            host.clone(),
            Some(Duration::from_secs(10)),
        )
        .await
        .unwrap();

    assert_eq!(value, json!({"score": 0.5, "prompt": "refused"}));
    let calls = host.calls.lock().unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].0, "utility");
    assert_eq!(calls[0].2, json!({"text": "abc"}));
    assert_eq!(calls[1].1, "prompt");
}

#[tokio::test]
async fn test_invocation_args_reach_the_worker() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());
    let script = r#"read -r invoke
case "$invoke" in
  *'"args":["payload",3]'*) echo '{"type":"result","value":true}' ;;
  *) echo '{"type":"result","value":false}' ;;
esac
"#;
    let program = executor.load(script, "algorithm").await.unwrap();
    let value = executor
        .invoke(
            Arc::new(program),
            Invocation::new().arg("payload").arg(3),
            Arc::new(NoCapabilities),
            None,
        )
        .await
        .unwrap();
    assert_eq!(value, json!(true));
}

#[tokio::test]
async fn test_forbidden_identifier_is_rejected_before_loading() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());
    let err = executor
        .load("# spins up a ProcessPoolExecutor\nread -r line\n", "improve_algorithm")
        .await
        .unwrap_err();
    match err {
        SandboxError::Violation(violation) => assert_eq!(violation.identifier, "ProcessPool"),
        other => panic!("expected violation, got {other:?}"),
    }
    assert!(
        !dir.path().exists() || std::fs::read_dir(dir.path()).unwrap().next().is_none(),
        "nothing should be materialized for a rejected candidate"
    );
}

#[tokio::test]
async fn test_blank_source_fails_to_load() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());
    let err = executor.load("  \n\t", "algorithm").await.unwrap_err();
    assert!(matches!(err, SandboxError::Load(LoadError::Empty { .. })));
}

#[tokio::test]
async fn test_pool_runs_queued_jobs_and_stops() {
    let dir = common::temp_dir();
    let executor = common::sh_executor(dir.path());
    let program = Arc::new(
        executor
            .load("read -r line\necho '{\"type\":\"result\",\"value\":\"ok\"}'\n", "algorithm")
            .await
            .unwrap(),
    );

    let pool = executor.pool();
    let handles: Vec<_> = (0..6)
        .map(|_| pool.schedule(Arc::clone(&program), Invocation::new(), Arc::new(NoCapabilities)))
        .collect();
    for handle in handles {
        assert_eq!(handle.result(Some(Duration::from_secs(10))).await.unwrap(), json!("ok"));
    }

    pool.shutdown(true).await;
    let late = pool.schedule(program, Invocation::new(), Arc::new(NoCapabilities));
    assert!(matches!(late.result(None).await, Err(SandboxError::Stopped)));
}
