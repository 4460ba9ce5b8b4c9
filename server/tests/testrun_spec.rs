#![cfg(unix)]
//! Whole test runs: server and worker sharing the in-process transport.

use anyhow::Result;
use protocol::{pack, CommandMessage, Message};
use server::{
    execute_testrun, BackendError, CaseResult, Judgement, PackageMap, ResultBackend,
    RunnerConfig, TestRunRequest, Verdict,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use transport::{MemoryTransport, Transport};
use worker::{TaskBroker, WorkerConfig, WorkerStats};

const DEVICE_QUEUE: &str = "n900";

async fn start_worker(transport: &MemoryTransport) -> Result<JoinHandle<WorkerStats>> {
    transport.declare_queue(DEVICE_QUEUE).await?;
    let config = WorkerConfig {
        routing_keys: vec![DEVICE_QUEUE.to_string()],
        hostname: Some("bench-1".to_string()),
        reconnect_backoff_secs: 1,
        ..WorkerConfig::default()
    };
    Ok(tokio::spawn(
        TaskBroker::new(Arc::new(transport.clone()), config).run(),
    ))
}

async fn stop_worker(transport: &MemoryTransport, handle: JoinHandle<WorkerStats>) -> Result<()> {
    let quit = CommandMessage::new(vec!["quit".to_string()], "unused", "quit", 0);
    transport
        .publish(DEVICE_QUEUE, pack(&Message::Command(quit))?)
        .await?;
    handle.await?;
    Ok(())
}

/// Shell task writing one JSON result file for `package` in `environment`.
fn writes_results(environment: &str, package: &str, cases: &str) -> Vec<String> {
    let script = format!(
        r#"d="$OTS_RESULTS_DIR/{environment}/{package}"; mkdir -p "$d" && printf '%s' '{{"cases":[{cases}]}}' > "$d/results.json""#
    );
    vec!["sh".to_string(), "-c".to_string(), script]
}

fn declared(entries: &[(&str, &str)]) -> PackageMap {
    let mut map = PackageMap::new();
    for (environment, package) in entries {
        map.entry(environment.to_string())
            .or_default()
            .insert(package.to_string());
    }
    map
}

#[derive(Clone, Default)]
struct Recorder {
    events: Arc<Mutex<Vec<String>>>,
}

impl ResultBackend for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn on_package_start(&mut self, package: &str, environment: &str) -> Result<(), BackendError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("start {package}-{environment}"));
        Ok(())
    }

    fn on_case(&mut self, case: &CaseResult) -> Result<(), BackendError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("case {} {}", case.name, case.result));
        Ok(())
    }

    fn on_package_end(&mut self) -> Result<(), BackendError> {
        self.events.lock().unwrap().push("end".to_string());
        Ok(())
    }

    fn on_finished(&mut self, _testrun_id: &str, judgement: &Judgement) -> Result<(), BackendError> {
        self.events
            .lock()
            .unwrap()
            .push(format!("finished {}", judgement.verdict));
        Ok(())
    }
}

#[tokio::test]
async fn passing_results_give_a_pass() -> Result<()> {
    let transport = MemoryTransport::new();
    let worker = start_worker(&transport).await?;

    let recorder = Recorder::default();
    let mut request = TestRunRequest::new(
        DEVICE_QUEUE,
        vec![writes_results(
            "hardware",
            "pkgA",
            r#"{"name":"boot","result":"PASS"}"#,
        )],
    );
    request.task_timeout = Duration::from_secs(30);
    request.declared_packages = declared(&[("hardware", "pkgA")]);
    request.backends.push(Box::new(recorder.clone()));

    let testrun = execute_testrun(
        Arc::new(transport.clone()),
        &RunnerConfig::default(),
        request,
    )
    .await;

    assert_eq!(testrun.verdict(), Verdict::Pass, "{:?}", testrun.error_info());
    assert_eq!(testrun.results().len(), 1);
    assert_eq!(testrun.results()[0].origin, "bench-1");
    assert!(testrun.executed_packages()["hardware"].contains("pkgA"));
    assert_eq!(
        *recorder.events.lock().unwrap(),
        vec![
            "start pkgA-hardware",
            "case boot PASS",
            "end",
            "finished PASS"
        ]
    );

    stop_worker(&transport, worker).await
}

#[tokio::test]
async fn missing_package_results_give_an_error() -> Result<()> {
    let transport = MemoryTransport::new();
    let worker = start_worker(&transport).await?;

    // pkgB is reported as executed but its result file never arrives.
    let script = r#"mkdir -p "$OTS_RESULTS_DIR/hardware/pkgA" "$OTS_RESULTS_DIR/hardware/pkgB" && printf '%s' '{"cases":[{"name":"a","result":"PASS"}]}' > "$OTS_RESULTS_DIR/hardware/pkgA/results.json" && echo log > "$OTS_RESULTS_DIR/hardware/pkgB/flash.log""#;
    let mut request = TestRunRequest::new(
        DEVICE_QUEUE,
        vec![vec!["sh".to_string(), "-c".to_string(), script.to_string()]],
    );
    request.task_timeout = Duration::from_secs(30);

    let testrun = execute_testrun(
        Arc::new(transport.clone()),
        &RunnerConfig::default(),
        request,
    )
    .await;

    assert_eq!(testrun.verdict(), Verdict::Error);
    assert!(testrun
        .error_info()
        .is_some_and(|info| info.contains("pkgB-hardware")));

    stop_worker(&transport, worker).await
}

#[tokio::test]
async fn failing_case_across_tasks_gives_a_fail() -> Result<()> {
    let transport = MemoryTransport::new();
    let worker = start_worker(&transport).await?;

    let mut request = TestRunRequest::new(
        DEVICE_QUEUE,
        vec![
            writes_results("hardware", "pkgA", r#"{"name":"a1","result":"PASS"}"#),
            writes_results(
                "hardware",
                "pkgB",
                r#"{"name":"b1","result":"PASS"},{"name":"b2","result":"FAIL"}"#,
            ),
        ],
    );
    request.task_timeout = Duration::from_secs(30);
    request.declared_packages = declared(&[("hardware", "pkgA"), ("hardware", "pkgB")]);

    let testrun = execute_testrun(
        Arc::new(transport.clone()),
        &RunnerConfig::default(),
        request,
    )
    .await;
    assert_eq!(testrun.verdict(), Verdict::Fail);

    stop_worker(&transport, worker).await
}

#[tokio::test]
async fn failing_command_makes_the_run_an_error() -> Result<()> {
    let transport = MemoryTransport::new();
    let worker = start_worker(&transport).await?;

    let mut request = TestRunRequest::new(
        DEVICE_QUEUE,
        vec![vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()]],
    );
    request.task_timeout = Duration::from_secs(30);
    request.declared_packages = declared(&[("hardware", "pkgA")]);

    let testrun = execute_testrun(
        Arc::new(transport.clone()),
        &RunnerConfig::default(),
        request,
    )
    .await;
    assert_eq!(testrun.verdict(), Verdict::Error);
    assert_eq!(testrun.error_code(), Some(1001));

    stop_worker(&transport, worker).await
}

#[tokio::test]
async fn unknown_device_group_gives_an_error_verdict() {
    let transport = MemoryTransport::new();
    let request = TestRunRequest::new(
        "no-such-device",
        vec![vec!["true".to_string()]],
    );

    let testrun = execute_testrun(Arc::new(transport.clone()), &RunnerConfig::default(), request).await;
    assert_eq!(testrun.verdict(), Verdict::Error);
    assert!(testrun
        .error_info()
        .is_some_and(|info| info.contains("no-such-device")));
    assert_eq!(transport.published_total(), 0);
}
