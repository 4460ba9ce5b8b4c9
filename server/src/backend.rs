//! Consumers of per-case results.
//!
//! A [`ResultWalker`](crate::walker::ResultWalker) drives the `on_*`
//! callbacks; the [`BackendDispatcher`] fans each callback out so that one
//! failing backend neither stops the others nor aborts the walk.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::judge::Judgement;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("backend '{backend}' failed: {reason}")]
pub struct BackendError {
    pub backend: String,
    pub reason: String,
}

impl BackendError {
    pub fn new(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

/// Outcome of one test case as read from a result file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseResult {
    pub name: String,
    pub result: String,
    pub insignificant: bool,
}

pub trait ResultBackend: Send {
    fn name(&self) -> &str;

    fn on_package_start(&mut self, package: &str, environment: &str) -> Result<(), BackendError>;

    fn on_case(&mut self, case: &CaseResult) -> Result<(), BackendError>;

    fn on_package_end(&mut self) -> Result<(), BackendError>;

    /// Called once, after the verdict has been decided.
    fn on_finished(&mut self, testrun_id: &str, judgement: &Judgement) -> Result<(), BackendError>;
}

/// Fans every callback out to all registered backends, collecting errors
/// instead of returning them.
#[derive(Default)]
pub struct BackendDispatcher<'a> {
    backends: Vec<&'a mut dyn ResultBackend>,
    errors: Vec<BackendError>,
}

impl<'a> BackendDispatcher<'a> {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn add(&mut self, backend: &'a mut dyn ResultBackend) {
        self.backends.push(backend);
    }

    pub fn errors(&self) -> &[BackendError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<BackendError> {
        self.errors
    }

    fn each<F>(&mut self, mut call: F)
    where
        F: FnMut(&mut dyn ResultBackend) -> Result<(), BackendError>,
    {
        for backend in self.backends.iter_mut() {
            if let Err(e) = call(&mut **backend) {
                warn!(backend = %e.backend, error = %e.reason, "Result backend failed");
                self.errors.push(e);
            }
        }
    }
}

impl ResultBackend for BackendDispatcher<'_> {
    fn name(&self) -> &str {
        "dispatcher"
    }

    fn on_package_start(&mut self, package: &str, environment: &str) -> Result<(), BackendError> {
        self.each(|b| b.on_package_start(package, environment));
        Ok(())
    }

    fn on_case(&mut self, case: &CaseResult) -> Result<(), BackendError> {
        self.each(|b| b.on_case(case));
        Ok(())
    }

    fn on_package_end(&mut self) -> Result<(), BackendError> {
        self.each(|b| b.on_package_end());
        Ok(())
    }

    fn on_finished(&mut self, testrun_id: &str, judgement: &Judgement) -> Result<(), BackendError> {
        self.each(|b| b.on_finished(testrun_id, judgement));
        Ok(())
    }
}

/// Writes every callback to the log.
#[derive(Debug, Default)]
pub struct LogBackend {
    package: Option<String>,
    cases: usize,
}

impl ResultBackend for LogBackend {
    fn name(&self) -> &str {
        "log"
    }

    fn on_package_start(&mut self, package: &str, environment: &str) -> Result<(), BackendError> {
        debug!(package = %package, environment = %environment, "Package results start");
        self.package = Some(format!("{package}-{environment}"));
        self.cases = 0;
        Ok(())
    }

    fn on_case(&mut self, case: &CaseResult) -> Result<(), BackendError> {
        debug!(
            case = %case.name,
            result = %case.result,
            insignificant = case.insignificant,
            "Test case"
        );
        self.cases += 1;
        Ok(())
    }

    fn on_package_end(&mut self) -> Result<(), BackendError> {
        info!(
            package = self.package.as_deref().unwrap_or("-"),
            cases = self.cases,
            "Package results end"
        );
        self.package = None;
        Ok(())
    }

    fn on_finished(&mut self, testrun_id: &str, judgement: &Judgement) -> Result<(), BackendError> {
        info!(
            testrun_id = %testrun_id,
            verdict = %judgement.verdict,
            info = judgement.info.as_deref().unwrap_or(""),
            "Testrun finished"
        );
        Ok(())
    }
}
