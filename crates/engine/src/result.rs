//! Run results and verdicts

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::action::ActionOutcome;
use crate::definition::{TestDefinition, UiExpectation};
use crate::error::Error;
use crate::monitor::{ConsoleEntry, NetworkRecord};

/// Terminal state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    Passed,
    /// Passed, but something non-critical did not hold
    PartialPass,
    Failed,
    /// Setup or navigation failed before the run could be judged
    Errored,
}

impl TestStatus {
    pub fn label(&self) -> &'static str {
        match self {
            TestStatus::Passed => "PASS",
            TestStatus::PartialPass => "PARTIAL PASS",
            TestStatus::Failed => "FAIL",
            TestStatus::Errored => "ERROR",
        }
    }
}

impl std::fmt::Display for TestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ActionFailed,
    ExpectationFailed,
}

/// What produced a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureSource {
    Action,
    Expectation,
    ConsoleAnomaly,
    NetworkAnomaly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailure {
    #[serde(rename = "type")]
    pub kind: FailureKind,
    pub source: FailureSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expectation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    pub message: String,
    /// Critical failures fail the run
    pub critical: bool,
}

impl TestFailure {
    /// A failed action; not critical on its own
    pub fn action(outcome: &ActionOutcome, selector: Option<&str>) -> Self {
        Self {
            kind: FailureKind::ActionFailed,
            source: FailureSource::Action,
            action_id: Some(outcome.action_id.clone()),
            expectation_id: None,
            selector: selector.map(String::from),
            message: outcome
                .error
                .clone()
                .unwrap_or_else(|| "action failed".to_string()),
            critical: false,
        }
    }

    pub fn expectation(expectation: &UiExpectation, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ExpectationFailed,
            source: FailureSource::Expectation,
            action_id: None,
            expectation_id: Some(expectation.id.clone()),
            selector: expectation.kind.selector().map(String::from),
            message: message.into(),
            critical: expectation.critical,
        }
    }

    /// Console or network anomaly; always critical
    pub fn anomaly(source: FailureSource, message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::ActionFailed,
            source,
            action_id: None,
            expectation_id: None,
            selector: None,
            message: message.into(),
            critical: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationEvidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationResult {
    pub expectation_id: String,
    #[serde(rename = "type")]
    pub expectation_type: String,
    pub description: String,
    pub critical: bool,
    pub passed: bool,
    /// False when the run ended before this expectation was checked
    pub evaluated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_value: Option<String>,
    pub evidence: ExpectationEvidence,
}

impl ExpectationResult {
    pub fn new(expectation: &UiExpectation, passed: bool, message: impl Into<String>) -> Self {
        Self {
            expectation_id: expectation.id.clone(),
            expectation_type: expectation.kind.name().to_string(),
            description: expectation.describe(),
            critical: expectation.critical,
            passed,
            evaluated: true,
            actual_value: None,
            expected_value: None,
            evidence: ExpectationEvidence {
                screenshot: None,
                timestamp: Utc::now(),
                message: message.into(),
            },
        }
    }

    pub fn values(mut self, actual: Option<String>, expected: Option<String>) -> Self {
        self.actual_value = actual;
        self.expected_value = expected;
        self
    }

    pub fn not_evaluated(expectation: &UiExpectation, reason: &str) -> Self {
        let mut result = Self::new(expectation, false, format!("not evaluated: {}", reason));
        result.evaluated = false;
        result
    }
}

/// The evidence bundle attached to every result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_baseline: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot_final: Option<PathBuf>,
    /// Before/after screenshots requested by actions, in capture order
    #[serde(default)]
    pub action_screenshots: Vec<PathBuf>,
    #[serde(default)]
    pub dom_snapshots: Vec<PathBuf>,
    #[serde(default)]
    pub console_logs: Vec<ConsoleEntry>,
    #[serde(default)]
    pub network_activity: Vec<NetworkRecord>,
    pub expected_outcome: String,
    pub actual_outcome: String,
    pub pass_fail: String,
}

/// Why a run ended early
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub message: String,
    /// The error followed by its causes
    pub chain: String,
}

impl From<&Error> for RunError {
    fn from(e: &Error) -> Self {
        Self {
            message: e.to_string(),
            chain: e.chain(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Unique per execution; distinguishes reruns of the same definition
    pub run_id: Uuid,
    pub test_id: String,
    pub test_name: String,
    pub status: TestStatus,
    pub passed: bool,
    pub partial_pass: bool,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub actions_executed: usize,
    pub action_outcomes: Vec<ActionOutcome>,
    pub expectation_results: Vec<ExpectationResult>,
    pub failures: Vec<TestFailure>,
    pub evidence: Evidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
}

impl TestResult {
    /// Empty result for a run that is starting now
    pub fn start(definition: &TestDefinition) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            test_id: definition.id.clone(),
            test_name: definition.name.clone(),
            status: TestStatus::Errored,
            passed: false,
            partial_pass: false,
            duration_ms: 0,
            started_at: now,
            completed_at: now,
            actions_executed: 0,
            action_outcomes: Vec::new(),
            expectation_results: Vec::new(),
            failures: Vec::new(),
            evidence: Evidence::default(),
            error: None,
        }
    }

    /// Apply the verdict rule and fill in the outcome strings
    pub fn finalize(&mut self, definition: &TestDefinition) {
        for expectation in definition.expectations.iter().skip(self.expectation_results.len()) {
            let reason = match &self.error {
                Some(error) => error.message.as_str(),
                None => "run ended early",
            };
            self.expectation_results
                .push(ExpectationResult::not_evaluated(expectation, reason));
        }

        let critical_failure = self.failures.iter().any(|f| f.critical);
        let anything_failed = !self.failures.is_empty()
            || self.expectation_results.iter().any(|r| !r.passed)
            || self.action_outcomes.iter().any(|o| !o.success);

        self.passed = self.error.is_none() && !critical_failure;
        self.partial_pass = self.passed && anything_failed;
        self.status = match (&self.error, self.passed, self.partial_pass) {
            (Some(_), _, _) => TestStatus::Errored,
            (None, true, false) => TestStatus::Passed,
            (None, true, true) => TestStatus::PartialPass,
            (None, false, _) => TestStatus::Failed,
        };

        self.completed_at = Utc::now();
        self.duration_ms = (self.completed_at - self.started_at).num_milliseconds().max(0) as u64;

        self.evidence.expected_outcome = definition
            .expectations
            .iter()
            .map(|e| e.describe())
            .collect::<Vec<_>>()
            .join("; ");
        let expectations_passed = self.expectation_results.iter().filter(|r| r.passed).count();
        let actions_failed = self.action_outcomes.iter().filter(|o| !o.success).count();
        self.evidence.actual_outcome = format!(
            "{}/{} actions executed ({} failed), {}/{} expectations passed, {} failure(s)",
            self.actions_executed,
            definition.actions.len(),
            actions_failed,
            expectations_passed,
            self.expectation_results.len(),
            self.failures.len()
        );
        self.evidence.pass_fail = self.status.label().to_string();
    }
}

/// Totals over a sequence of runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub total: usize,
    pub passed: usize,
    pub partial: usize,
    pub failed: usize,
    pub errored: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl SuiteSummary {
    pub fn push(&mut self, result: TestResult) {
        self.total += 1;
        match result.status {
            TestStatus::Passed => self.passed += 1,
            TestStatus::PartialPass => self.partial += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Errored => self.errored += 1,
        }
        self.duration_ms += result.duration_ms;
        self.results.push(result);
    }

    /// Every run passed, partial passes included
    pub fn all_passed(&self) -> bool {
        self.failed == 0 && self.errored == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::UiAction;

    fn definition() -> TestDefinition {
        TestDefinition::new("t1", "Verdicts", "http://app.test/")
            .action(UiAction::click("a1", "#go"))
            .expect(UiExpectation::url_contains("e1", "/done"))
            .expect(UiExpectation::element_visible("e2", "#banner").critical(false))
    }

    fn outcome(success: bool) -> ActionOutcome {
        ActionOutcome {
            action_id: "a1".to_string(),
            action_type: "click".to_string(),
            success,
            duration_ms: 3,
            error: (!success).then(|| "Element not found: #go".to_string()),
        }
    }

    #[test]
    fn test_all_green_passes() {
        let def = definition();
        let mut result = TestResult::start(&def);
        result.actions_executed = 1;
        result.action_outcomes.push(outcome(true));
        for e in &def.expectations {
            result.expectation_results.push(ExpectationResult::new(e, true, "ok"));
        }
        result.finalize(&def);
        assert_eq!(result.status, TestStatus::Passed);
        assert!(result.passed && !result.partial_pass);
        assert_eq!(result.evidence.pass_fail, "PASS");
        assert_eq!(result.evidence.expected_outcome, "url contains \"/done\"; #banner is visible");
    }

    #[test]
    fn test_non_critical_failure_is_partial_pass() {
        let def = definition();
        let mut result = TestResult::start(&def);
        result.expectation_results.push(ExpectationResult::new(&def.expectations[0], true, "ok"));
        result.expectation_results.push(ExpectationResult::new(&def.expectations[1], false, "hidden"));
        result.failures.push(TestFailure::expectation(&def.expectations[1], "hidden"));
        result.finalize(&def);
        assert_eq!(result.status, TestStatus::PartialPass);
        assert!(result.passed && result.partial_pass);
    }

    #[test]
    fn test_failed_action_alone_is_partial_pass() {
        let def = definition();
        let mut result = TestResult::start(&def);
        let failed = outcome(false);
        result.failures.push(TestFailure::action(&failed, Some("#go")));
        result.action_outcomes.push(failed);
        result.actions_executed = 1;
        for e in &def.expectations {
            result.expectation_results.push(ExpectationResult::new(e, true, "ok"));
        }
        result.finalize(&def);
        assert_eq!(result.status, TestStatus::PartialPass);
    }

    #[test]
    fn test_anomaly_fails_run() {
        let def = definition();
        let mut result = TestResult::start(&def);
        for e in &def.expectations {
            result.expectation_results.push(ExpectationResult::new(e, true, "ok"));
        }
        result
            .failures
            .push(TestFailure::anomaly(FailureSource::ConsoleAnomaly, "1 unexpected console error(s)"));
        result.finalize(&def);
        assert_eq!(result.status, TestStatus::Failed);
        assert_eq!(result.failures[0].kind, FailureKind::ActionFailed);
    }

    #[test]
    fn test_errored_run_reports_unevaluated_expectations() {
        let def = definition();
        let mut result = TestResult::start(&def);
        result.error = Some(RunError::from(&Error::Navigation("net::ERR_CONNECTION_REFUSED".to_string())));
        result.finalize(&def);
        assert_eq!(result.status, TestStatus::Errored);
        assert!(!result.passed);
        assert_eq!(result.expectation_results.len(), 2);
        assert!(result.expectation_results.iter().all(|r| !r.evaluated && !r.passed));
        assert_eq!(
            result.evidence.actual_outcome,
            "0/1 actions executed (0 failed), 0/2 expectations passed, 0 failure(s)"
        );
    }

    #[test]
    fn test_failure_serializes_type_tag() {
        let failure = TestFailure::anomaly(FailureSource::NetworkAnomaly, "boom");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["type"], "action_failed");
        assert_eq!(json["source"], "network_anomaly");
    }

    #[test]
    fn test_suite_summary() {
        let def = definition();
        let mut summary = SuiteSummary::default();
        let mut ok = TestResult::start(&def);
        for e in &def.expectations {
            ok.expectation_results.push(ExpectationResult::new(e, true, "ok"));
        }
        ok.finalize(&def);
        summary.push(ok);
        assert!(summary.all_passed());

        let mut errored = TestResult::start(&def);
        errored.error = Some(RunError { message: "x".into(), chain: "x".into() });
        errored.finalize(&def);
        summary.push(errored);
        assert_eq!((summary.total, summary.passed, summary.errored), (2, 1, 1));
        assert!(!summary.all_passed());
    }
}
