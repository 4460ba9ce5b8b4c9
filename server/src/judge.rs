//! Turns streamed case outcomes into a verdict.

use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::backend::{BackendError, CaseResult, ResultBackend};
use crate::testrun::Verdict;

/// A verdict and, for ERROR, what went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Judgement {
    pub verdict: Verdict,
    pub info: Option<String>,
}

impl Judgement {
    pub fn new(verdict: Verdict, info: Option<String>) -> Self {
        Self { verdict, info }
    }

    fn error(info: impl Into<String>) -> Self {
        Self::new(Verdict::Error, Some(info.into()))
    }
}

/// Environment-qualified package name, the key verdict accounting uses.
pub fn qualified_package(package: &str, environment: &str) -> String {
    format!("{package}-{environment}")
}

#[derive(Debug, Default)]
pub struct ResultJudge {
    received: BTreeSet<String>,
    significant: Vec<String>,
    insignificant: Vec<String>,
}

impl ResultJudge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_package(&mut self, package: &str, environment: &str) {
        let name = qualified_package(package, environment);
        debug!(package = %name, "Judging package");
        self.received.insert(name);
    }

    pub fn record_case(&mut self, result: &str, insignificant: bool) {
        let normalized = result.trim().to_uppercase();
        if insignificant {
            self.insignificant.push(normalized);
        } else {
            self.significant.push(normalized);
        }
    }

    pub fn received_packages(&self) -> &BTreeSet<String> {
        &self.received
    }

    pub fn finalize(
        &self,
        required_packages: &BTreeSet<String>,
        insignificant_tests_matter: bool,
    ) -> Judgement {
        if required_packages.is_empty() {
            return Judgement::error("no packages defined nor found");
        }

        let missing: Vec<&str> = required_packages
            .iter()
            .filter(|package| !self.received.contains(*package))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Judgement::error(format!(
                "missing results for packages: {}",
                missing.join(", ")
            ));
        }

        let mut tally: Vec<&str> = self.significant.iter().map(String::as_str).collect();
        if insignificant_tests_matter {
            tally.extend(self.insignificant.iter().map(String::as_str));
        }

        let verdict = if tally.is_empty() {
            Verdict::NoCases
        } else if tally.iter().all(|result| *result == "PASS") {
            Verdict::Pass
        } else {
            Verdict::Fail
        };
        info!(verdict = %verdict, cases = tally.len(), "Results judged");
        Judgement::new(verdict, None)
    }
}

impl ResultBackend for ResultJudge {
    fn name(&self) -> &str {
        "judge"
    }

    fn on_package_start(&mut self, package: &str, environment: &str) -> Result<(), BackendError> {
        self.begin_package(package, environment);
        Ok(())
    }

    fn on_case(&mut self, case: &CaseResult) -> Result<(), BackendError> {
        self.record_case(&case.result, case.insignificant);
        Ok(())
    }

    fn on_package_end(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    fn on_finished(&mut self, _testrun_id: &str, _judgement: &Judgement) -> Result<(), BackendError> {
        Ok(())
    }
}
