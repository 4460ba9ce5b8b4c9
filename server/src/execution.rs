use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use transport::Transport;
use uuid::Uuid;

use crate::backend::{LogBackend, ResultBackend};
use crate::runner::{RunnerConfig, TaskRunner};
use crate::testrun::{PackageMap, TestRun, Verdict};
use crate::walker::JsonResultWalker;

/// What to run, where, and what results to expect.
pub struct TestRunRequest {
    pub routing_key: String,
    pub tasks: Vec<Vec<String>>,
    pub task_timeout: Duration,
    pub declared_packages: PackageMap,
    pub insignificant_tests_matter: bool,
    pub xml_plan: Option<String>,
    /// Extra backends notified alongside the log backend.
    pub backends: Vec<Box<dyn ResultBackend>>,
}

impl TestRunRequest {
    pub fn new(routing_key: impl Into<String>, tasks: Vec<Vec<String>>) -> Self {
        Self {
            routing_key: routing_key.into(),
            tasks,
            task_timeout: Duration::from_secs(3600),
            declared_packages: PackageMap::new(),
            insignificant_tests_matter: false,
            xml_plan: None,
            backends: Vec::new(),
        }
    }
}

/// Dispatch a test run, wait for its tasks, and judge the results.
///
/// Never fails: anything that goes wrong ends up as an ERROR verdict with a
/// description on the returned run.
pub async fn execute_testrun(
    transport: Arc<dyn Transport>,
    config: &RunnerConfig,
    request: TestRunRequest,
) -> TestRun {
    let id = Uuid::new_v4().to_string();
    let mut testrun = TestRun::new(id.clone(), request.declared_packages)
        .with_insignificant_tests_matter(request.insignificant_tests_matter);
    testrun.add_backend(Box::new(LogBackend::default()));
    for backend in request.backends {
        testrun.add_backend(backend);
    }

    info!(
        testrun_id = %id,
        routing_key = %request.routing_key,
        tasks = request.tasks.len(),
        "Starting testrun"
    );

    let mut runner = TaskRunner::new(transport, request.routing_key, id.clone(), config.clone());
    if let Some(plan) = request.xml_plan {
        runner = runner.with_xml_plan(plan);
    }
    for argv in request.tasks {
        if let Err(e) = runner.add_task(argv, request.task_timeout) {
            testrun.set_error(e.to_string(), None);
        }
    }

    if let Err(e) = runner.run(&mut testrun).await {
        error!(testrun_id = %id, error = %e, "Testrun aborted");
        testrun.set_error(e.to_string(), None);
    }

    let verdict = testrun.judge(&JsonResultWalker);
    if verdict == Verdict::Error {
        error!(testrun_id = %id, info = testrun.error_info().unwrap_or(""), "Testrun ERROR");
    }
    testrun
}
