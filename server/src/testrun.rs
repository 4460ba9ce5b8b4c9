//! One requested test run: everything its workers reported, and its verdict.

use protocol::{Message, MonitorMessage, ResultObject};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::backend::{BackendDispatcher, BackendError, ResultBackend};
use crate::judge::{qualified_package, Judgement, ResultJudge};
use crate::runner::ResponseHandler;
use crate::walker::ResultWalker;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    NotReady,
    Pass,
    Fail,
    NoCases,
    Error,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::NotReady => f.write_str("NOT_READY"),
            Verdict::Pass => f.write_str("PASS"),
            Verdict::Fail => f.write_str("FAIL"),
            Verdict::NoCases => f.write_str("NO_CASES"),
            Verdict::Error => f.write_str("ERROR"),
        }
    }
}

/// Packages per environment.
pub type PackageMap = BTreeMap<String, BTreeSet<String>>;

pub struct TestRun {
    id: String,
    verdict: Verdict,
    error_info: Option<String>,
    error_code: Option<i32>,
    declared_packages: PackageMap,
    executed_packages: PackageMap,
    results: Vec<ResultObject>,
    status_history: Vec<(String, String)>,
    monitor_events: Vec<MonitorMessage>,
    backends: Vec<Box<dyn ResultBackend>>,
    backend_errors: Vec<BackendError>,
    insignificant_tests_matter: bool,
}

impl TestRun {
    pub fn new(id: impl Into<String>, declared_packages: PackageMap) -> Self {
        Self {
            id: id.into(),
            verdict: Verdict::NotReady,
            error_info: None,
            error_code: None,
            declared_packages,
            executed_packages: PackageMap::new(),
            results: Vec::new(),
            status_history: Vec::new(),
            monitor_events: Vec::new(),
            backends: Vec::new(),
            backend_errors: Vec::new(),
            insignificant_tests_matter: false,
        }
    }

    pub fn with_insignificant_tests_matter(mut self, matter: bool) -> Self {
        self.insignificant_tests_matter = matter;
        self
    }

    pub fn add_backend(&mut self, backend: Box<dyn ResultBackend>) {
        self.backends.push(backend);
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn error_info(&self) -> Option<&str> {
        self.error_info.as_deref()
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error_code
    }

    pub fn results(&self) -> &[ResultObject] {
        &self.results
    }

    pub fn executed_packages(&self) -> &PackageMap {
        &self.executed_packages
    }

    pub fn status_history(&self) -> &[(String, String)] {
        &self.status_history
    }

    pub fn monitor_events(&self) -> &[MonitorMessage] {
        &self.monitor_events
    }

    pub fn backend_errors(&self) -> &[BackendError] {
        &self.backend_errors
    }

    /// Set the verdict. ERROR always applies; anything else only while the
    /// verdict is still NOT_READY. Returns whether the verdict changed.
    pub fn set_result(&mut self, verdict: Verdict, info: Option<String>) -> bool {
        let applies = match verdict {
            Verdict::Error => true,
            Verdict::NotReady => false,
            _ => self.verdict == Verdict::NotReady,
        };
        if !applies {
            debug!(testrun_id = %self.id, current = %self.verdict, ignored = %verdict, "Verdict already final");
            return false;
        }

        self.verdict = verdict;
        if verdict == Verdict::Error {
            warn!(testrun_id = %self.id, info = info.as_deref().unwrap_or(""), "Testrun set to ERROR");
            self.error_info = info;
        }
        true
    }

    pub fn set_error(&mut self, info: impl Into<String>, code: Option<i32>) {
        self.set_result(Verdict::Error, Some(info.into()));
        if code.is_some() {
            self.error_code = code;
        }
    }

    /// Packages whose results must be present.
    ///
    /// Per environment, what workers reported executing wins; environments
    /// no worker reported on fall back to the declared packages.
    pub fn required_packages(&self) -> BTreeSet<String> {
        let mut required = BTreeSet::new();
        for (environment, packages) in &self.executed_packages {
            for package in packages {
                required.insert(qualified_package(package, environment));
            }
        }
        for (environment, packages) in &self.declared_packages {
            if self.executed_packages.contains_key(environment) {
                continue;
            }
            for package in packages {
                required.insert(qualified_package(package, environment));
            }
        }
        required
    }

    /// Walk every received result through the judge and the registered
    /// backends, then settle the verdict.
    pub fn judge(&mut self, walker: &dyn ResultWalker) -> Verdict {
        let mut judge = ResultJudge::new();
        let walk_errors = {
            let mut dispatcher = BackendDispatcher::new();
            dispatcher.add(&mut judge);
            for backend in self.backends.iter_mut() {
                dispatcher.add(backend.as_mut());
            }
            for result in &self.results {
                if let Err(e) = walker.walk(result, &mut dispatcher) {
                    error!(testrun_id = %self.id, file = %result.filename, error = %e, "Skipping result file");
                }
            }
            dispatcher.into_errors()
        };
        self.backend_errors.extend(walk_errors);

        // An earlier ERROR keeps its own description.
        if self.verdict == Verdict::NotReady {
            let judgement =
                judge.finalize(&self.required_packages(), self.insignificant_tests_matter);
            self.set_result(judgement.verdict, judgement.info);
        }

        let finished = Judgement::new(self.verdict, self.error_info.clone());
        let finish_errors = {
            let mut dispatcher = BackendDispatcher::new();
            for backend in self.backends.iter_mut() {
                dispatcher.add(backend.as_mut());
            }
            dispatcher.on_finished(&self.id, &finished).ok();
            dispatcher.into_errors()
        };
        self.backend_errors.extend(finish_errors);

        info!(testrun_id = %self.id, verdict = %self.verdict, "Testrun judged");
        self.verdict
    }
}

impl ResponseHandler for TestRun {
    fn handle(&mut self, message: Message) {
        match message {
            Message::ResultObject(result) => {
                debug!(
                    testrun_id = %self.id,
                    file = %result.result.filename,
                    package = %result.result.package,
                    environment = %result.result.environment,
                    "Result received"
                );
                self.results.push(result.result);
            }
            Message::TestpackageList(list) => {
                info!(testrun_id = %self.id, environment = %list.environment, packages = ?list.packages, "Packages executed");
                self.executed_packages
                    .entry(list.environment)
                    .or_default()
                    .extend(list.packages);
            }
            Message::TestrunError(err) => {
                self.set_error(err.error_info, Some(err.error_code));
            }
            Message::TestrunStatus(status) => {
                info!(testrun_id = %self.id, state = %status.state, info = %status.status_info, "Testrun status");
                self.status_history.push((status.state, status.status_info));
            }
            Message::Monitor(event) => {
                debug!(testrun_id = %self.id, sender = %event.sender, event = ?event.event, "Monitor event");
                self.monitor_events.push(event);
            }
            other => {
                warn!(testrun_id = %self.id, kind = %other.kind(), "Unexpected message relayed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::ErrorCode;

    fn packages(entries: &[(&str, &[&str])]) -> PackageMap {
        entries
            .iter()
            .map(|(env, pkgs)| {
                (
                    env.to_string(),
                    pkgs.iter().map(|p| p.to_string()).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn error_is_sticky_and_always_wins() {
        let mut run = TestRun::new("r", PackageMap::new());
        assert!(run.set_result(Verdict::Pass, None));
        assert!(!run.set_result(Verdict::Fail, None));
        assert_eq!(run.verdict(), Verdict::Pass);

        assert!(run.set_result(Verdict::Error, Some("worker lost".into())));
        for later in [Verdict::Pass, Verdict::Fail, Verdict::NoCases, Verdict::NotReady] {
            assert!(!run.set_result(later, None));
        }
        assert_eq!(run.verdict(), Verdict::Error);
        assert_eq!(run.error_info(), Some("worker lost"));

        assert!(run.set_result(Verdict::Error, Some("second".into())));
        assert_eq!(run.error_info(), Some("second"));
    }

    #[test]
    fn reported_packages_win_per_environment() {
        let mut run = TestRun::new(
            "r",
            packages(&[("hardware", &["pkgA", "pkgB"]), ("host", &["pkgC"])]),
        );
        run.handle(Message::package_list("hardware", vec!["pkgA".into()]));

        let required: Vec<String> = run.required_packages().into_iter().collect();
        assert_eq!(required, vec!["pkgA-hardware", "pkgC-host"]);
    }

    #[test]
    fn worker_error_marks_the_run() {
        let mut run = TestRun::new("r", PackageMap::new());
        run.handle(Message::error("flash failed", ErrorCode::CommandFailed));
        assert_eq!(run.verdict(), Verdict::Error);
        assert_eq!(run.error_code(), Some(1001));
        assert_eq!(run.error_info(), Some("flash failed"));
    }

    #[test]
    fn judging_walks_received_results() {
        let mut run = TestRun::new("r", packages(&[("hardware", &["pkgA"])]));
        run.handle(Message::result(ResultObject {
            filename: "results.json".to_string(),
            content: br#"{"cases":[{"name":"boot","result":"PASS"}]}"#.to_vec(),
            origin: "bench-1".to_string(),
            package: "pkgA".to_string(),
            environment: "hardware".to_string(),
        }));
        assert_eq!(run.judge(&crate::walker::JsonResultWalker), Verdict::Pass);
    }

    #[test]
    fn earlier_error_keeps_its_description() {
        let mut run = TestRun::new("r", PackageMap::new());
        run.set_error("queue timeout", None);
        assert_eq!(run.judge(&crate::walker::JsonResultWalker), Verdict::Error);
        assert_eq!(run.error_info(), Some("queue timeout"));
    }

    #[test]
    fn status_and_monitor_messages_are_recorded() {
        let mut run = TestRun::new("r", PackageMap::new());
        run.handle(Message::status("RUNNING", "flashing"));
        run.handle(Message::monitor(
            protocol::MonitorEventKind::TaskStarted,
            "bench-1",
            "started",
        ));
        assert_eq!(run.status_history().len(), 1);
        assert_eq!(run.monitor_events().len(), 1);
        assert_eq!(run.verdict(), Verdict::NotReady);
    }
}
