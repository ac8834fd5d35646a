//! Test orchestration
//!
//! One run walks these phases in order, awaiting each step before the
//! next:
//!
//! ```text
//! setup -> navigate -> baseline_capture
//!       -> (pre_screenshot -> execute -> post_screenshot)*
//!       -> final_capture -> verify_expectations -> assert_anomalies
//!       -> assemble_verdict -> cleanup
//! ```
//!
//! Only setup, navigation and evidence capture around them abort a run.
//! Action and expectation failures are accumulated, and cleanup always
//! runs.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::action::ActionExecutor;
use crate::config::EngineConfig;
use crate::definition::{ExpectationKind, TestDefinition, UiExpectation};
use crate::driver::{Browser, LoadState, Page};
use crate::error::{Error, Result};
use crate::lifecycle::{PageHandle, PageManager};
use crate::monitor::{ConsoleMonitor, NetworkMonitor};
use crate::result::{
    ExpectationResult, FailureSource, RunError, SuiteSummary, TestFailure, TestResult,
};
use crate::state::{DomPhase, StateVerifier};
use crate::visual::{ScreenshotPhase, VisualVerifier};

/// Where a run currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Setup,
    Navigate,
    BaselineCapture,
    PreScreenshot,
    Execute,
    PostScreenshot,
    FinalCapture,
    VerifyExpectations,
    AssertAnomalies,
    AssembleVerdict,
    Cleanup,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunPhase::Setup => "setup",
            RunPhase::Navigate => "navigate",
            RunPhase::BaselineCapture => "baseline_capture",
            RunPhase::PreScreenshot => "pre_screenshot",
            RunPhase::Execute => "execute",
            RunPhase::PostScreenshot => "post_screenshot",
            RunPhase::FinalCapture => "final_capture",
            RunPhase::VerifyExpectations => "verify_expectations",
            RunPhase::AssertAnomalies => "assert_anomalies",
            RunPhase::AssembleVerdict => "assemble_verdict",
            RunPhase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Monitors scoped to one run
struct Monitors {
    console: ConsoleMonitor,
    network: NetworkMonitor,
}

/// Runs test definitions against pages from a shared [`PageManager`]
pub struct TestExecutor {
    manager: Arc<PageManager>,
    config: EngineConfig,
    actions: ActionExecutor,
    state: StateVerifier,
    visual: VisualVerifier,
}

impl TestExecutor {
    pub fn new(manager: Arc<PageManager>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            actions: ActionExecutor::new(config.timing.clone()),
            state: StateVerifier::new(&config),
            visual: VisualVerifier::new(&config),
            manager,
            config,
        })
    }

    /// Executor with its own page manager over `browser`
    pub fn with_browser(browser: Arc<dyn Browser>, config: EngineConfig) -> Result<Self> {
        let manager = Arc::new(PageManager::new(browser, config.default_viewport));
        Self::new(manager, config)
    }

    pub fn manager(&self) -> &Arc<PageManager> {
        &self.manager
    }

    pub fn visual(&self) -> &VisualVerifier {
        &self.visual
    }

    pub fn state(&self) -> &StateVerifier {
        &self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one definition to a verdict. Never fails: setup and navigation
    /// errors produce an errored result.
    pub async fn run(&self, definition: &TestDefinition) -> TestResult {
        let mut result = TestResult::start(definition);
        info!(
            "Running test {} ({}) as run {}",
            definition.id, definition.name, result.run_id
        );

        if let Err(e) = definition.validate() {
            return self.abort(definition, result, RunPhase::Setup, &e);
        }

        let monitors = match self.monitors() {
            Ok(monitors) => monitors,
            Err(e) => return self.abort(definition, result, RunPhase::Setup, &e),
        };

        phase(definition, RunPhase::Setup);
        let page = match self.manager.create_page().await {
            Ok(page) => page,
            Err(e) => return self.abort(definition, result, RunPhase::Setup, &e),
        };

        if let Err((at, e)) = self.drive(definition, &page, &monitors, &mut result).await {
            warn!("Test {} errored during {}: {}", definition.id, at, e);
            result.error = Some(RunError::from(&e));
            if result.evidence.screenshot_baseline.is_none() {
                result.evidence.screenshot_baseline =
                    self.salvage_screenshot(&page, ScreenshotPhase::Baseline).await;
            }
            if result.evidence.screenshot_final.is_none() {
                result.evidence.screenshot_final =
                    self.salvage_screenshot(&page, ScreenshotPhase::Final).await;
            }
        }

        phase(definition, RunPhase::Cleanup);
        result.evidence.console_logs = monitors.console.logs();
        result.evidence.network_activity = monitors.network.requests();
        monitors.console.clear();
        monitors.network.clear();
        if let Err(e) = self.manager.close_page(&page).await {
            warn!("Failed to close page for test {}: {}", definition.id, e);
        }

        result.finalize(definition);
        info!(
            "Test {} finished: {} ({} ms)",
            definition.id, result.status, result.duration_ms
        );
        result
    }

    /// Run definitions one after another
    pub async fn run_all(&self, definitions: &[TestDefinition]) -> SuiteSummary {
        let mut summary = SuiteSummary::default();
        for definition in definitions {
            summary.push(self.run(definition).await);
        }
        info!(
            "Suite finished: {} passed, {} partial, {} failed, {} errored",
            summary.passed, summary.partial, summary.failed, summary.errored
        );
        summary
    }

    /// Close every page and the browser
    pub async fn shutdown(&self) -> Result<()> {
        self.manager.cleanup().await
    }

    fn monitors(&self) -> Result<Monitors> {
        Ok(Monitors {
            console: ConsoleMonitor::new(&self.config.console)?,
            network: NetworkMonitor::new(&self.config.network)?,
        })
    }

    fn abort(
        &self,
        definition: &TestDefinition,
        mut result: TestResult,
        at: RunPhase,
        error: &Error,
    ) -> TestResult {
        warn!("Test {} errored during {}: {}", definition.id, at, error);
        result.error = Some(RunError::from(error));
        result.finalize(definition);
        result
    }

    /// Phases between setup and cleanup; an `Err` aborts the run
    async fn drive(
        &self,
        definition: &TestDefinition,
        page: &PageHandle,
        monitors: &Monitors,
        result: &mut TestResult,
    ) -> std::result::Result<(), (RunPhase, Error)> {
        let handle = page;
        let page = &**handle;
        let at = |p: RunPhase| move |e: Error| (p, e);

        monitors.console.attach(page);
        monitors.network.attach(page);
        if let Some(viewport) = definition.viewport {
            self.manager
                .set_viewport(handle, viewport)
                .await
                .map_err(at(RunPhase::Setup))?;
        }

        phase(definition, RunPhase::Navigate);
        page.goto(
            &definition.url,
            LoadState::NetworkIdle,
            self.config.timing.navigation_timeout(),
        )
        .await
        .map_err(at(RunPhase::Navigate))?;

        phase(definition, RunPhase::BaselineCapture);
        let baseline = self
            .visual
            .capture_full_page(page, ScreenshotPhase::Baseline, None)
            .await
            .map_err(at(RunPhase::BaselineCapture))?;
        result.evidence.screenshot_baseline = Some(baseline);
        let dom = self
            .state
            .capture_dom_state(page, DomPhase::Baseline)
            .await
            .map_err(at(RunPhase::BaselineCapture))?;
        result.evidence.dom_snapshots.push(dom);

        for action in &definition.actions {
            if action.screenshot_before {
                phase(definition, RunPhase::PreScreenshot);
                self.action_screenshot(page, ScreenshotPhase::BeforeAction, &action.id, result)
                    .await;
            }

            phase(definition, RunPhase::Execute);
            let outcome = self.actions.execute(page, action).await;
            if !outcome.success {
                result
                    .failures
                    .push(TestFailure::action(&outcome, action.kind.selector()));
            }
            result.action_outcomes.push(outcome);
            result.actions_executed += 1;

            if action.screenshot_after {
                phase(definition, RunPhase::PostScreenshot);
                self.action_screenshot(page, ScreenshotPhase::AfterAction, &action.id, result)
                    .await;
            }
        }

        phase(definition, RunPhase::FinalCapture);
        let final_shot = self
            .visual
            .capture_full_page(page, ScreenshotPhase::Final, None)
            .await
            .map_err(at(RunPhase::FinalCapture))?;
        result.evidence.screenshot_final = Some(final_shot.clone());
        let dom = self
            .state
            .capture_dom_state(page, DomPhase::Final)
            .await
            .map_err(at(RunPhase::FinalCapture))?;
        result.evidence.dom_snapshots.push(dom);

        phase(definition, RunPhase::VerifyExpectations);
        for expectation in &definition.expectations {
            let mut checked = self.evaluate(page, expectation, monitors).await;
            checked.evidence.screenshot = Some(final_shot.clone());

            if !checked.passed {
                if let Some(path) = self.failed_element_evidence(page, expectation).await {
                    checked.evidence.screenshot = Some(path);
                }
                result.failures.push(TestFailure::expectation(
                    expectation,
                    format!("{}: {}", expectation.describe(), checked.evidence.message),
                ));
            }
            result.expectation_results.push(checked);
        }

        phase(definition, RunPhase::AssertAnomalies);
        if self.config.assert_console_clean {
            let outcome = monitors.console.assert_no_errors();
            if !outcome.passed {
                result
                    .failures
                    .push(TestFailure::anomaly(FailureSource::ConsoleAnomaly, outcome.message));
            }
        }
        if self.config.assert_network_clean {
            let outcome = monitors.network.assert_no_failed_requests();
            if !outcome.passed {
                result
                    .failures
                    .push(TestFailure::anomaly(FailureSource::NetworkAnomaly, outcome.message));
            }
        }

        phase(definition, RunPhase::AssembleVerdict);
        Ok(())
    }

    async fn action_screenshot(
        &self,
        page: &dyn Page,
        at: ScreenshotPhase,
        action_id: &str,
        result: &mut TestResult,
    ) {
        match self.visual.capture_full_page(page, at, Some(action_id)).await {
            Ok(path) => result.evidence.action_screenshots.push(path),
            Err(e) => warn!("Screenshot {} for action {} failed: {}", at.as_str(), action_id, e),
        }
    }

    /// Whatever the page shows after an abort
    async fn salvage_screenshot(&self, page: &PageHandle, at: ScreenshotPhase) -> Option<PathBuf> {
        match self.visual.capture_full_page(&**page, at, None).await {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("No {} screenshot for errored run: {}", at.as_str(), e);
                None
            }
        }
    }

    /// Crop of the element a failed expectation was about, when it has one
    async fn failed_element_evidence(
        &self,
        page: &dyn Page,
        expectation: &UiExpectation,
    ) -> Option<PathBuf> {
        if !self.config.visual.capture_failed_elements {
            return None;
        }
        let selector = expectation.kind.selector()?;
        match self
            .visual
            .capture_element(page, selector, ScreenshotPhase::Final, Some(&expectation.id))
            .await
        {
            Ok(path) => Some(path),
            Err(e) => {
                debug!("No element evidence for {}: {}", expectation.id, e);
                None
            }
        }
    }

    /// One handler per expectation type. Check errors fail the expectation
    /// instead of the run.
    async fn evaluate(
        &self,
        page: &dyn Page,
        expectation: &UiExpectation,
        monitors: &Monitors,
    ) -> ExpectationResult {
        let checked = match &expectation.kind {
            ExpectationKind::ElementVisible { selector } => {
                self.state
                    .verify_element_visible(page, selector)
                    .await
                    .map(|v| {
                        let passed = v.visible && v.styled_visible();
                        let actual = format!(
                            "visible: {}, display: {}, visibility: {}",
                            v.visible, v.display, v.visibility
                        );
                        let message = if passed {
                            format!("{} is visible", selector)
                        } else {
                            format!("{} is not visible ({})", selector, actual)
                        };
                        ExpectationResult::new(expectation, passed, message)
                            .values(Some(actual), Some("visible".to_string()))
                    })
            }
            ExpectationKind::ElementEnabled { selector } => {
                self.state.get_element_state(page, selector).await.map(|s| {
                    let (passed, actual) = match (s.exists, s.interactivity.disabled) {
                        (false, _) => (false, "not found"),
                        (true, true) => (false, "disabled"),
                        (true, false) => (true, "enabled"),
                    };
                    ExpectationResult::new(expectation, passed, format!("{} is {}", selector, actual))
                        .values(Some(actual.to_string()), Some("enabled".to_string()))
                })
            }
            ExpectationKind::TextPresent { selector, expected_value, mode } => {
                let selector = selector.as_deref().unwrap_or("body");
                self.state
                    .verify_text_content(page, selector, expected_value, *mode)
                    .await
                    .map(|check| {
                        let message = if !check.found {
                            format!("{} not found", selector)
                        } else if check.matches {
                            format!("{} text matched", selector)
                        } else {
                            format!("{} text was \"{}\"", selector, check.actual)
                        };
                        ExpectationResult::new(expectation, check.matches, message)
                            .values(Some(check.actual), Some(check.expected))
                    })
            }
            ExpectationKind::CssProperty { selector, property, expected_value } => self
                .state
                .verify_css_property(page, selector, property, expected_value)
                .await
                .map(|check| {
                    let message = match &check.actual {
                        None => format!("{} not found", selector),
                        Some(actual) => format!("{} {} is {}", selector, property, actual),
                    };
                    ExpectationResult::new(expectation, check.matches, message)
                        .values(check.actual, Some(check.expected))
                }),
            ExpectationKind::ConsoleNoErrors => {
                let outcome = monitors.console.assert_no_errors();
                let count = monitors.console.unexpected_errors().len();
                Ok(ExpectationResult::new(expectation, outcome.passed, outcome.message)
                    .values(Some(format!("{} error(s)", count)), Some("0 error(s)".to_string())))
            }
            ExpectationKind::NetworkSuccess => {
                let outcome = monitors.network.assert_no_failed_requests();
                let count = monitors.network.failed_request_count();
                Ok(ExpectationResult::new(expectation, outcome.passed, outcome.message).values(
                    Some(format!("{} failed request(s)", count)),
                    Some("0 failed request(s)".to_string()),
                ))
            }
            ExpectationKind::UrlContains { expected_value } => page.url().await.map(|url| {
                let passed = url.contains(expected_value.as_str());
                ExpectationResult::new(expectation, passed, format!("current url is {}", url))
                    .values(Some(url), Some(expected_value.clone()))
            }),
        };

        match checked {
            Ok(result) => {
                debug!(
                    "Expectation {} {}",
                    expectation.id,
                    if result.passed { "held" } else { "did not hold" }
                );
                result
            }
            Err(e) => {
                warn!("Expectation {} could not be checked: {}", expectation.id, e);
                ExpectationResult::new(expectation, false, e.to_string())
            }
        }
    }
}

fn phase(definition: &TestDefinition, phase: RunPhase) {
    debug!("Test {}: {}", definition.id, phase);
}
