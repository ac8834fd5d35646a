use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::config::ConsoleConfig;
use crate::driver::{ConsoleLevel, Page, PageEvent, TimedEvent};
use crate::error::Result;
use super::{compile_patterns, AssertionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsoleSource {
    /// `console.*` call
    Console,
    /// Uncaught exception
    PageError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleEntry {
    pub level: ConsoleLevel,
    pub text: String,
    pub source: ConsoleSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    events: Option<UnboundedReceiver<TimedEvent>>,
    logs: Vec<ConsoleEntry>,
}

/// Accumulates console output and uncaught page errors
pub struct ConsoleMonitor {
    ignore: Vec<Regex>,
    fail_on_warnings: bool,
    inner: Mutex<Inner>,
}

impl ConsoleMonitor {
    pub fn new(config: &ConsoleConfig) -> Result<Self> {
        Ok(Self {
            ignore: compile_patterns(&config.ignore_patterns)?,
            fail_on_warnings: config.fail_on_warnings,
            inner: Mutex::new(Inner::default()),
        })
    }

    /// Start collecting from `page`, replacing any previous attachment
    pub fn attach(&self, page: &dyn Page) {
        let mut inner = self.inner.lock();
        inner.events = Some(page.subscribe());
        debug!("Console monitor attached to {}", page.id());
    }

    fn drain(inner: &mut Inner) {
        let Some(events) = inner.events.as_mut() else {
            return;
        };
        while let Ok(TimedEvent { at, event }) = events.try_recv() {
            let entry = match event {
                PageEvent::Console { level, text, location } => ConsoleEntry {
                    level,
                    text,
                    source: ConsoleSource::Console,
                    location,
                    timestamp: at,
                },
                PageEvent::PageError { message } => ConsoleEntry {
                    level: ConsoleLevel::Error,
                    text: message,
                    source: ConsoleSource::PageError,
                    location: None,
                    timestamp: at,
                },
                _ => continue,
            };
            inner.logs.push(entry);
        }
    }

    /// Everything logged so far, in arrival order
    pub fn logs(&self) -> Vec<ConsoleEntry> {
        let mut inner = self.inner.lock();
        Self::drain(&mut inner);
        inner.logs.clone()
    }

    pub fn errors(&self) -> Vec<ConsoleEntry> {
        self.logs()
            .into_iter()
            .filter(|e| e.level == ConsoleLevel::Error)
            .collect()
    }

    pub fn warnings(&self) -> Vec<ConsoleEntry> {
        self.logs()
            .into_iter()
            .filter(|e| e.level == ConsoleLevel::Warning)
            .collect()
    }

    /// Errors (and warnings when configured) not covered by an ignore pattern
    pub fn unexpected_errors(&self) -> Vec<ConsoleEntry> {
        self.logs()
            .into_iter()
            .filter(|e| {
                e.level == ConsoleLevel::Error
                    || (self.fail_on_warnings && e.level == ConsoleLevel::Warning)
            })
            .filter(|e| !self.ignore.iter().any(|re| re.is_match(&e.text)))
            .collect()
    }

    pub fn assert_no_errors(&self) -> AssertionOutcome {
        let unexpected = self.unexpected_errors();
        match unexpected.first() {
            None => AssertionOutcome::pass("No console errors"),
            Some(first) => AssertionOutcome::fail(format!(
                "{} unexpected console error(s); first: {}",
                unexpected.len(),
                first.text
            )),
        }
    }

    /// Forget collected entries and detach from the page
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.events = None;
        inner.logs.clear();
    }
}
