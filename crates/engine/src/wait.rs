//! Wait conditions
//!
//! Element, URL and predicate waits poll the page at a fixed interval
//! until they hold or their timeout elapses. Load-state waits are
//! delegated to the driver, which observes navigation events directly.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::definition::{ElementWaitState, WaitCondition};
use crate::driver::{LoadState, Page};
use crate::error::{Error, Result};
use crate::probe;

/// URL matcher: `/regex/`, a `*` glob, or a plain substring
#[derive(Debug, Clone)]
pub enum UrlPattern {
    Substring(String),
    Glob(regex::Regex),
    Regex(regex::Regex),
}

impl UrlPattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.len() > 2 && pattern.starts_with('/') && pattern.ends_with('/') {
            let body = &pattern[1..pattern.len() - 1];
            return Ok(UrlPattern::Regex(regex::Regex::new(body)?));
        }
        if pattern.contains('*') {
            return Ok(UrlPattern::Glob(glob_to_regex(pattern)?));
        }
        Ok(UrlPattern::Substring(pattern.to_string()))
    }

    pub fn matches(&self, url: &str) -> bool {
        match self {
            UrlPattern::Substring(s) => url.contains(s.as_str()),
            UrlPattern::Glob(re) | UrlPattern::Regex(re) => re.is_match(url),
        }
    }
}

/// `**` spans path separators, `*` stays within one segment
fn glob_to_regex(glob: &str) -> Result<regex::Regex> {
    let mut re = String::from("^");
    let mut chars = glob.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' if chars.peek() == Some(&'*') => {
                chars.next();
                re.push_str(".*");
            }
            '*' => re.push_str("[^/]*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    Ok(regex::Regex::new(&re)?)
}

/// Evaluates [`WaitCondition`]s against a page
#[derive(Debug, Clone)]
pub struct Waiter {
    poll_interval: Duration,
}

impl Default for Waiter {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

impl Waiter {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Block until `condition` holds
    pub async fn wait_for(&self, page: &dyn Page, condition: &WaitCondition) -> Result<()> {
        let timeout = Duration::from_millis(condition.timeout_ms());
        debug!("Waiting for {}", condition.describe());

        match condition {
            WaitCondition::Element { selector, state, .. } => {
                self.wait_for_element(page, selector, *state, timeout).await
            }
            WaitCondition::Url { url_pattern, .. } => self.wait_for_url(page, url_pattern, timeout).await,
            WaitCondition::NetworkIdle { .. } => {
                page.wait_for_load_state(LoadState::NetworkIdle, timeout).await
            }
            WaitCondition::Load { .. } => page.wait_for_load_state(LoadState::Load, timeout).await,
            WaitCondition::Function { expression, .. } => {
                self.wait_for_function(page, expression, timeout).await
            }
        }
    }

    pub async fn wait_for_element(
        &self,
        page: &dyn Page,
        selector: &str,
        state: ElementWaitState,
        timeout: Duration,
    ) -> Result<()> {
        let what = format!("element {} to be {}", selector, state);
        self.poll(&what, timeout, || async move {
            match state {
                ElementWaitState::Attached => Ok(page.count(selector).await? > 0),
                ElementWaitState::Detached => Ok(page.count(selector).await? == 0),
                ElementWaitState::Visible => match probe::is_visible(page, selector).await {
                    Ok(visible) => Ok(visible),
                    Err(e) if e.is_not_found() => Ok(false),
                    Err(e) => Err(e),
                },
                ElementWaitState::Hidden => match probe::is_visible(page, selector).await {
                    Ok(visible) => Ok(!visible),
                    Err(e) if e.is_not_found() => Ok(true),
                    Err(e) => Err(e),
                },
            }
        })
        .await
    }

    pub async fn wait_for_url(&self, page: &dyn Page, pattern: &str, timeout: Duration) -> Result<()> {
        let matcher = UrlPattern::parse(pattern)?;
        let what = format!("url matching {}", pattern);
        let matcher = &matcher;
        self.poll(&what, timeout, || async move {
            Ok(matcher.matches(&page.url().await?))
        })
        .await
    }

    /// Poll a JavaScript expression until it evaluates truthy
    pub async fn wait_for_function(&self, page: &dyn Page, expression: &str, timeout: Duration) -> Result<()> {
        let what = format!("predicate `{}`", expression);
        self.poll(&what, timeout, || async move {
            Ok(is_truthy(&page.evaluate(expression).await?))
        })
        .await
    }

    /// Run `probe` until it returns `true`, an error, or time runs out.
    /// The probe always runs at least once.
    pub async fn poll<F, Fut>(&self, what: &str, timeout: Duration, mut probe: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let deadline = Instant::now() + timeout;
        loop {
            if probe().await? {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(Error::timeout(what, timeout.as_millis() as u64));
            }
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

/// JavaScript truthiness for values coming back from `evaluate`
pub fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}
