//! Action execution
//!
//! [`ActionExecutor::execute`] never fails: every error, including a
//! timeout, is folded into the returned [`ActionOutcome`] so the run can
//! record it and move on to the next action.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::config::TimingConfig;
use crate::definition::{ActionKind, ElementWaitState, UiAction};
use crate::driver::Page;
use crate::error::{Error, Result};
use crate::probe::{self, Clickability};
use crate::wait::Waiter;

/// What happened when one action ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub action_id: String,
    pub action_type: String,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Performs [`UiAction`]s with their pre- and post-conditions
pub struct ActionExecutor {
    waiter: Waiter,
    timing: TimingConfig,
}

impl ActionExecutor {
    pub fn new(timing: TimingConfig) -> Self {
        Self {
            waiter: Waiter::new(timing.poll_interval()),
            timing,
        }
    }

    pub fn waiter(&self) -> &Waiter {
        &self.waiter
    }

    pub async fn execute(&self, page: &dyn Page, action: &UiAction) -> ActionOutcome {
        let started = Instant::now();
        debug!("Executing action {} ({})", action.id, action.label());

        let result = self.run(page, action).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                debug!("Action {} succeeded in {} ms", action.id, duration_ms);
                ActionOutcome {
                    action_id: action.id.clone(),
                    action_type: action.kind.name().to_string(),
                    success: true,
                    duration_ms,
                    error: None,
                }
            }
            Err(e) => {
                warn!("Action {} failed: {}", action.id, e);
                ActionOutcome {
                    action_id: action.id.clone(),
                    action_type: action.kind.name().to_string(),
                    success: false,
                    duration_ms,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn run(&self, page: &dyn Page, action: &UiAction) -> Result<()> {
        if let Some(condition) = &action.wait_for {
            self.waiter.wait_for(page, condition).await?;
        }

        let budget = Duration::from_millis(action.timeout_ms);
        match timeout(budget, self.dispatch(page, action, budget)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::timeout(
                    format!("{} action {}", action.kind.name(), action.id),
                    action.timeout_ms,
                ))
            }
        }

        if let Some(condition) = &action.wait_after {
            self.waiter.wait_for(page, condition).await?;
        }
        Ok(())
    }

    async fn dispatch(&self, page: &dyn Page, action: &UiAction, budget: Duration) -> Result<()> {
        match &action.kind {
            ActionKind::Click { selector } => self.click(page, selector, budget).await,
            ActionKind::Type { selector, value, delay_ms } => {
                self.visible(page, selector, budget).await?;
                page.fill(selector, "").await?;
                match delay_ms.filter(|d| *d > 0) {
                    Some(delay) => {
                        let mut buf = [0u8; 4];
                        for c in value.chars() {
                            page.insert_text(selector, c.encode_utf8(&mut buf)).await?;
                            sleep(Duration::from_millis(delay)).await;
                        }
                        Ok(())
                    }
                    None => page.insert_text(selector, value).await,
                }
            }
            ActionKind::Fill { selector, value } => {
                self.visible(page, selector, budget).await?;
                page.fill(selector, value).await
            }
            ActionKind::Scroll { selector } => self.scroll(page, selector).await,
            ActionKind::Hover { selector } => {
                self.visible(page, selector, budget).await?;
                page.hover(selector).await?;
                sleep(self.timing.hover_settle()).await;
                Ok(())
            }
            ActionKind::Drag { selector, target_selector } => {
                self.drag(page, selector, target_selector, budget).await
            }
            ActionKind::Keyboard { selector, key, delay_ms }
            | ActionKind::Press { selector, key, delay_ms } => {
                if let Some(selector) = selector {
                    self.visible(page, selector, budget).await?;
                    page.focus(selector).await?;
                }
                press_chord(page, key, delay_ms.map(Duration::from_millis)).await
            }
            ActionKind::Select { selector, value } => {
                self.visible(page, selector, budget).await?;
                let selected = page.select_option(selector, value).await?;
                if !selected.iter().any(|v| v == value) {
                    return Err(Error::driver(format!("{} did not select {}", selector, value)));
                }
                Ok(())
            }
            ActionKind::Check { selector } => {
                self.visible(page, selector, budget).await?;
                page.set_checked(selector, true).await
            }
            ActionKind::Uncheck { selector } => {
                self.visible(page, selector, budget).await?;
                page.set_checked(selector, false).await
            }
        }
    }

    /// Implicit visibility wait, bounded by the action's own budget
    async fn visible(&self, page: &dyn Page, selector: &str, budget: Duration) -> Result<()> {
        let limit = budget.min(Duration::from_millis(self.timing.element_timeout_ms));
        if page.count(selector).await? == 0 {
            // fail with the selector rather than a generic timeout once the wait expires
            return match self
                .waiter
                .wait_for_element(page, selector, ElementWaitState::Visible, limit)
                .await
            {
                Ok(()) => Ok(()),
                Err(Error::Timeout { .. }) => Err(Error::not_found(selector)),
                Err(e) => Err(e),
            };
        }
        self.waiter
            .wait_for_element(page, selector, ElementWaitState::Visible, limit)
            .await
    }

    async fn click(&self, page: &dyn Page, selector: &str, budget: Duration) -> Result<()> {
        self.visible(page, selector, budget).await?;

        let viewport = page.viewport().await?;
        let in_view = page
            .bounding_box(selector)
            .await?
            .map(|rect| rect.within(viewport))
            .unwrap_or(false);
        if !in_view {
            page.scroll_into_view(selector).await?;
        }

        match probe::clickability(page, selector).await? {
            Clickability::Clickable => page.click(selector).await,
            blocked => Err(Error::NotClickable {
                selector: selector.to_string(),
                reason: blocked.reason(),
            }),
        }
    }

    async fn scroll(&self, page: &dyn Page, target: &str) -> Result<()> {
        let trimmed = target.trim();
        if trimmed.eq_ignore_ascii_case("bottom") {
            return page.scroll_to_bottom().await;
        }
        if let Ok(delta) = trimmed.parse::<f64>() {
            return page.scroll_by(0.0, delta).await;
        }
        if page.count(target).await? > 0 {
            return page.scroll_into_view(target).await;
        }
        Err(Error::not_found(target))
    }

    async fn drag(&self, page: &dyn Page, source: &str, target: &str, budget: Duration) -> Result<()> {
        self.visible(page, source, budget).await?;
        self.visible(page, target, budget).await?;

        let from = page
            .bounding_box(source)
            .await?
            .ok_or_else(|| Error::NoBoundingBox { selector: source.to_string() })?;
        let to = page
            .bounding_box(target)
            .await?
            .ok_or_else(|| Error::NoBoundingBox { selector: target.to_string() })?;

        page.mouse_move(from.center(), 1).await?;
        page.mouse_down().await?;
        page.mouse_move(to.center(), self.timing.drag_steps.max(1)).await?;
        page.mouse_up().await
    }
}

/// Split `Control+Shift+K` into keys; a `+` where a key is expected is the plus key
fn chord_keys(chord: &str) -> Result<Vec<&str>> {
    let mut keys = Vec::new();
    let mut rest = chord;
    while !rest.is_empty() {
        let (key, tail) = match rest.strip_prefix('+') {
            Some(tail) => ("+", tail),
            None => rest.split_at(rest.find('+').unwrap_or(rest.len())),
        };
        keys.push(key);
        rest = match tail.strip_prefix('+') {
            Some("") => return Err(Error::driver(format!("dangling '+' in key chord: {:?}", chord))),
            Some(next) => next,
            None => tail,
        };
    }
    if keys.is_empty() {
        return Err(Error::driver(format!("empty key chord: {:?}", chord)));
    }
    Ok(keys)
}

/// Press `key`, or a `+` chord such as `Control+Shift+K`: modifiers go
/// down in order, the last key is pressed, modifiers come up in reverse.
async fn press_chord(page: &dyn Page, key: &str, delay: Option<Duration>) -> Result<()> {
    let parts = chord_keys(key)?;
    let Some((last, modifiers)) = parts.split_last() else {
        return Err(Error::driver(format!("empty key chord: {:?}", key)));
    };

    let pause = || async {
        if let Some(delay) = delay {
            sleep(delay).await;
        }
    };

    for modifier in modifiers {
        page.key_down(modifier).await?;
        pause().await;
    }
    page.press_key(last).await?;
    for modifier in modifiers.iter().rev() {
        pause().await;
        page.key_up(modifier).await?;
    }
    Ok(())
}
