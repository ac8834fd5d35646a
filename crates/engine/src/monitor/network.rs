use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::debug;

use crate::config::NetworkConfig;
use crate::driver::{Page, PageEvent, TimedEvent};
use crate::error::Result;
use crate::wait::UrlPattern;
use super::{compile_patterns, AssertionOutcome};

/// One request and, once known, how it ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    pub request_id: String,
    pub url: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl NetworkRecord {
    pub fn is_pending(&self) -> bool {
        self.status.is_none() && self.failure.is_none()
    }

    fn is_failed(&self, redirects_are_failures: bool) -> bool {
        if self.failure.is_some() {
            return true;
        }
        match self.status {
            Some(status) if status >= 400 => true,
            Some(status) if redirects_are_failures && (300..400).contains(&status) => true,
            _ => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    events: Option<UnboundedReceiver<TimedEvent>>,
    records: Vec<NetworkRecord>,
    by_id: HashMap<String, usize>,
}

impl Inner {
    fn record_for(&mut self, request_id: &str, url: &str, at: DateTime<Utc>) -> &mut NetworkRecord {
        let index = match self.by_id.get(request_id) {
            Some(index) => *index,
            None => {
                // response without a request event
                self.records.push(NetworkRecord {
                    request_id: request_id.to_string(),
                    url: url.to_string(),
                    method: "GET".to_string(),
                    resource_type: None,
                    status: None,
                    failure: None,
                    started_at: at,
                });
                let index = self.records.len() - 1;
                self.by_id.insert(request_id.to_string(), index);
                index
            }
        };
        &mut self.records[index]
    }

    fn drain(&mut self) {
        let Some(events) = self.events.as_mut() else {
            return;
        };
        let mut batch = Vec::new();
        while let Ok(event) = events.try_recv() {
            batch.push(event);
        }
        for TimedEvent { at, event } in batch {
            match event {
                PageEvent::Request { request_id, url, method, resource_type } => {
                    self.by_id.insert(request_id.clone(), self.records.len());
                    self.records.push(NetworkRecord {
                        request_id,
                        url,
                        method,
                        resource_type,
                        status: None,
                        failure: None,
                        started_at: at,
                    });
                }
                PageEvent::Response { request_id, url, status } => {
                    self.record_for(&request_id, &url, at).status = Some(status);
                }
                PageEvent::RequestFailed { request_id, url, error } => {
                    self.record_for(&request_id, &url, at).failure = Some(error);
                }
                _ => {}
            }
        }
    }
}

/// Correlates requests with their responses and flags failures
pub struct NetworkMonitor {
    ignore: Vec<Regex>,
    redirects_are_failures: bool,
    inner: Mutex<Inner>,
}

impl NetworkMonitor {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        Ok(Self {
            ignore: compile_patterns(&config.ignore_url_patterns)?,
            redirects_are_failures: config.redirects_are_failures,
            inner: Mutex::new(Inner::default()),
        })
    }

    pub fn attach(&self, page: &dyn Page) {
        self.inner.lock().events = Some(page.subscribe());
        debug!("Network monitor attached to {}", page.id());
    }

    pub fn requests(&self) -> Vec<NetworkRecord> {
        let mut inner = self.inner.lock();
        inner.drain();
        inner.records.clone()
    }

    /// Failed requests whose URL is not ignored
    pub fn failed_requests(&self) -> Vec<NetworkRecord> {
        self.requests()
            .into_iter()
            .filter(|r| r.is_failed(self.redirects_are_failures))
            .filter(|r| !self.ignore.iter().any(|re| re.is_match(&r.url)))
            .collect()
    }

    pub fn failed_request_count(&self) -> usize {
        self.failed_requests().len()
    }

    pub fn pending_requests(&self) -> Vec<NetworkRecord> {
        self.requests().into_iter().filter(NetworkRecord::is_pending).collect()
    }

    /// Requests whose URL matches a substring, `*` glob or `/regex/`
    pub fn requests_matching(&self, pattern: &str) -> Result<Vec<NetworkRecord>> {
        let pattern = UrlPattern::parse(pattern)?;
        Ok(self
            .requests()
            .into_iter()
            .filter(|r| pattern.matches(&r.url))
            .collect())
    }

    pub fn assert_no_failed_requests(&self) -> AssertionOutcome {
        let failed = self.failed_requests();
        match failed.first() {
            None => AssertionOutcome::pass("No failed network requests"),
            Some(first) => {
                let reason = match (&first.failure, first.status) {
                    (Some(error), _) => error.clone(),
                    (None, Some(status)) => format!("HTTP {}", status),
                    (None, None) => "unknown".to_string(),
                };
                AssertionOutcome::fail(format!(
                    "{} failed network request(s); first: {} {} ({})",
                    failed.len(),
                    first.method,
                    first.url,
                    reason
                ))
            }
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.events = None;
        inner.records.clear();
        inner.by_id.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Browser, LoadState};
    use crate::simulated::{Effect, Element, SimulatedBrowser, SiteDocument};
    use crate::definition::Viewport;
    use std::time::Duration;

    fn request(url: &str, status: Option<u16>, failure: Option<&str>) -> Effect {
        Effect::Request {
            url: url.to_string(),
            status,
            failure: failure.map(String::from),
        }
    }

    async fn loaded(config: &NetworkConfig) -> (std::sync::Arc<dyn Page>, NetworkMonitor) {
        let browser = SimulatedBrowser::new();
        browser.add_document(
            "http://app.test/",
            SiteDocument::new("Network")
                .on_load(request("http://app.test/api/me", Some(200), None))
                .on_load(request("http://app.test/old", Some(301), None))
                .on_load(request("http://analytics.test/collect", None, Some("net::ERR_BLOCKED_BY_CLIENT")))
                .with(
                    Element::new("#save", "button")
                        .at(0.0, 0.0, 50.0, 20.0)
                        .on_click(request("http://app.test/api/save", Some(500), None))
                        .on_click(request("http://app.test/api/slow", None, None)),
                ),
        );
        let page = browser.new_page(Viewport::default()).await.unwrap();
        let monitor = NetworkMonitor::new(config).unwrap();
        monitor.attach(page.as_ref());
        page.goto("http://app.test/", LoadState::Load, Duration::from_secs(1)).await.unwrap();
        (page, monitor)
    }

    #[tokio::test]
    async fn test_correlates_and_ignores() {
        let config = NetworkConfig {
            ignore_url_patterns: vec!["analytics".to_string()],
            redirects_are_failures: false,
        };
        let (page, monitor) = loaded(&config).await;

        // document + three on-load requests
        assert_eq!(monitor.requests().len(), 4);
        assert!(monitor.assert_no_failed_requests().passed);

        page.click("#save").await.unwrap();
        assert_eq!(monitor.failed_request_count(), 1);
        assert_eq!(monitor.pending_requests().len(), 1);
        let outcome = monitor.assert_no_failed_requests();
        assert!(!outcome.passed);
        assert!(outcome.message.contains("HTTP 500"), "{}", outcome.message);

        let api = monitor.requests_matching("**/api/*").unwrap();
        assert_eq!(api.len(), 3);
    }

    #[tokio::test]
    async fn test_redirects_and_transport_failures() {
        let config = NetworkConfig {
            ignore_url_patterns: vec![],
            redirects_are_failures: true,
        };
        let (_page, monitor) = loaded(&config).await;
        let failed = monitor.failed_requests();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().any(|r| r.status == Some(301)));
        assert!(failed.iter().any(|r| r.failure.is_some()));
    }

    #[tokio::test]
    async fn test_requests_keep_start_time() {
        let (page, monitor) = loaded(&NetworkConfig::default()).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let clicked_at = chrono::Utc::now();
        page.click("#save").await.unwrap();
        let clicked_done = chrono::Utc::now();
        tokio::time::sleep(Duration::from_millis(300)).await;

        let requests = monitor.requests();
        let (before, after) = requests.split_at(4);
        assert!(before.iter().all(|r| r.started_at < clicked_at));
        assert_eq!(after.len(), 2);
        assert!(after
            .iter()
            .all(|r| r.started_at >= clicked_at && r.started_at <= clicked_done));
    }

    #[tokio::test]
    async fn test_clear() {
        let (_page, monitor) = loaded(&NetworkConfig::default()).await;
        assert!(!monitor.requests().is_empty());
        monitor.clear();
        assert!(monitor.requests().is_empty());
    }
}
