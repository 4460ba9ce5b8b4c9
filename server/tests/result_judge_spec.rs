use server::{ResultJudge, Verdict};
use std::collections::BTreeSet;

fn required(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn missing_package_is_an_error_naming_it() {
    let mut judge = ResultJudge::new();
    judge.begin_package("pkgA", "hardware");
    judge.record_case("PASS", false);
    judge.record_case("PASS", false);

    let judgement = judge.finalize(&required(&["pkgA-hardware", "pkgB-hardware"]), false);
    assert_eq!(judgement.verdict, Verdict::Error);
    let info = judgement.info.expect("error info");
    assert!(info.contains("pkgB-hardware"), "{info}");
    assert!(!info.contains("pkgA-hardware"), "{info}");
}

#[test]
fn one_failing_case_fails_the_run() {
    let mut judge = ResultJudge::new();
    judge.begin_package("pkgA", "hardware");
    judge.record_case("PASS", false);
    judge.begin_package("pkgB", "hardware");
    judge.record_case("PASS", false);
    judge.record_case("FAIL", false);
    judge.record_case("PASS", false);

    let judgement = judge.finalize(&required(&["pkgA-hardware", "pkgB-hardware"]), false);
    assert_eq!(judgement.verdict, Verdict::Fail);
    assert_eq!(judgement.info, None);
}

#[test]
fn nothing_required_is_an_error() {
    let judge = ResultJudge::new();
    let judgement = judge.finalize(&BTreeSet::new(), false);
    assert_eq!(judgement.verdict, Verdict::Error);
    assert_eq!(
        judgement.info.as_deref(),
        Some("no packages defined nor found")
    );
}

#[test]
fn packages_without_cases_are_no_cases() {
    let mut judge = ResultJudge::new();
    judge.begin_package("pkgA", "host");
    assert_eq!(
        judge.finalize(&required(&["pkgA-host"]), true).verdict,
        Verdict::NoCases
    );
}

#[test]
fn all_passing_cases_pass() {
    let mut judge = ResultJudge::new();
    judge.begin_package("pkgA", "hardware");
    judge.record_case("PASS", false);
    judge.begin_package("pkgA", "host");
    judge.record_case("pass", false);
    assert_eq!(
        judge
            .finalize(&required(&["pkgA-hardware", "pkgA-host"]), false)
            .verdict,
        Verdict::Pass
    );
}
