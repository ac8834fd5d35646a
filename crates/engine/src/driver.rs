//! Browser automation seam
//!
//! The engine never talks to a browser directly. Everything it needs from
//! an automation backend is expressed by [`Browser`] and [`Page`]; the
//! Playwright bridge in [`crate::playwright`] and the in-memory
//! [`crate::simulated`] browser both implement them.
//!
//! Selector-based queries fail with [`Error::ElementNotFound`] when the
//! selector matches nothing. Callers that want conservative answers (the
//! state verifier, wait loops) match on that variant.
//!
//! [`Error::ElementNotFound`]: crate::error::Error::ElementNotFound

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::definition::Viewport;
use crate::error::Result;

/// Element geometry in CSS pixels, relative to the viewport origin
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn center(&self) -> Point {
        Point {
            x: self.x + self.width / 2.0,
            y: self.y + self.height / 2.0,
        }
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.x < self.x + self.width
            && point.y >= self.y
            && point.y < self.y + self.height
    }

    /// True when the whole box lies inside a viewport anchored at the origin
    pub fn within(&self, viewport: Viewport) -> bool {
        self.x >= 0.0
            && self.y >= 0.0
            && self.x + self.width <= viewport.width as f64
            && self.y + self.height <= viewport.height as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

impl LoadState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadState::Load => "load",
            LoadState::DomContentLoaded => "domcontentloaded",
            LoadState::NetworkIdle => "networkidle",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotOptions {
    /// Capture the whole scrollable page instead of the viewport
    pub full_page: bool,
    /// Crop to this region (page coordinates when `full_page` is set)
    pub clip: Option<BoundingBox>,
}

impl ScreenshotOptions {
    pub fn full_page() -> Self {
        Self {
            full_page: true,
            clip: None,
        }
    }

    pub fn clip(region: BoundingBox) -> Self {
        Self {
            full_page: false,
            clip: Some(region),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleLevel {
    Log,
    Debug,
    Info,
    Warning,
    Error,
}

impl ConsoleLevel {
    /// Map a driver-reported message type (`warn`, `warning`, `error`, ...)
    pub fn parse(kind: &str) -> Self {
        match kind {
            "error" | "assert" => ConsoleLevel::Error,
            "warn" | "warning" => ConsoleLevel::Warning,
            "info" => ConsoleLevel::Info,
            "debug" | "trace" => ConsoleLevel::Debug,
            _ => ConsoleLevel::Log,
        }
    }
}

/// Something the page reported while the run was attached to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PageEvent {
    Console {
        level: ConsoleLevel,
        text: String,
        #[serde(default)]
        location: Option<String>,
    },

    /// Uncaught exception thrown by page script
    PageError { message: String },

    Request {
        request_id: String,
        url: String,
        method: String,
        #[serde(default)]
        resource_type: Option<String>,
    },

    Response {
        request_id: String,
        url: String,
        status: u16,
    },

    RequestFailed {
        request_id: String,
        url: String,
        error: String,
    },
}

/// A [`PageEvent`] stamped with the moment the driver observed it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: PageEvent,
}

impl TimedEvent {
    pub fn now(event: PageEvent) -> Self {
        Self { at: Utc::now(), event }
    }
}

/// A browser able to hand out isolated pages
#[async_trait]
pub trait Browser: Send + Sync {
    /// Open a page in a fresh browsing context (no shared cookies or storage)
    async fn new_page(&self, viewport: Viewport) -> Result<Arc<dyn Page>>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// One page inside its own browsing context
#[async_trait]
pub trait Page: Send + Sync {
    fn id(&self) -> &str;

    // Navigation and page-level state

    async fn goto(&self, url: &str, wait_until: LoadState, timeout: Duration) -> Result<()>;

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()>;

    async fn url(&self) -> Result<String>;

    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;

    async fn viewport(&self) -> Result<Viewport>;

    /// Serialized markup of the whole document
    async fn content(&self) -> Result<String>;

    async fn evaluate(&self, expression: &str) -> Result<serde_json::Value>;

    // Selector queries

    async fn count(&self, selector: &str) -> Result<usize>;

    /// `None` when the element exists but is not rendered
    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>>;

    async fn computed_style(&self, selector: &str, property: &str) -> Result<String>;

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>>;

    /// DOM property such as `disabled` or `checked`
    async fn property(&self, selector: &str, name: &str) -> Result<serde_json::Value>;

    /// Rendered text (`innerText`)
    async fn text(&self, selector: &str) -> Result<String>;

    /// Lowercase tag name
    async fn tag_name(&self, selector: &str) -> Result<String>;

    async fn outer_html(&self, selector: &str) -> Result<String>;

    /// True when the topmost element at `point` is the matched element or
    /// one of its descendants
    async fn hit_test(&self, selector: &str, point: Point) -> Result<bool>;

    // Input

    async fn click(&self, selector: &str) -> Result<()>;

    async fn focus(&self, selector: &str) -> Result<()>;

    /// Replace the value atomically
    async fn fill(&self, selector: &str, value: &str) -> Result<()>;

    /// Insert text at the caret of the focused element, firing key events
    async fn insert_text(&self, selector: &str, text: &str) -> Result<()>;

    async fn hover(&self, selector: &str) -> Result<()>;

    async fn scroll_into_view(&self, selector: &str) -> Result<()>;

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<()>;

    async fn scroll_to_bottom(&self) -> Result<()>;

    async fn mouse_move(&self, point: Point, steps: u32) -> Result<()>;

    async fn mouse_down(&self) -> Result<()>;

    async fn mouse_up(&self) -> Result<()>;

    async fn key_down(&self, key: &str) -> Result<()>;

    async fn key_up(&self, key: &str) -> Result<()>;

    async fn press_key(&self, key: &str) -> Result<()>;

    /// Returns the values that ended up selected
    async fn select_option(&self, selector: &str, value: &str) -> Result<Vec<String>>;

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<()>;

    // Evidence

    /// PNG bytes
    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>>;

    /// Register a listener; every event after this call is delivered to it
    fn subscribe(&self) -> UnboundedReceiver<TimedEvent>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounding_box_geometry() {
        let b = BoundingBox::new(10.0, 20.0, 100.0, 40.0);
        assert_eq!(b.center(), Point { x: 60.0, y: 40.0 });
        assert!(b.has_area());
        assert!(b.contains(Point { x: 10.0, y: 20.0 }));
        assert!(!b.contains(Point { x: 110.0, y: 20.0 }));
        assert!(b.within(Viewport { width: 200, height: 100 }));
        assert!(!b.within(Viewport { width: 100, height: 100 }));
        assert!(!BoundingBox::new(0.0, 0.0, 0.0, 10.0).has_area());
    }

    #[test]
    fn test_console_level_parse() {
        assert_eq!(ConsoleLevel::parse("warn"), ConsoleLevel::Warning);
        assert_eq!(ConsoleLevel::parse("error"), ConsoleLevel::Error);
        assert_eq!(ConsoleLevel::parse("table"), ConsoleLevel::Log);
    }

    #[test]
    fn test_page_event_wire_shape() {
        let json = r#"{"event":"response","request_id":"7","url":"http://x/api","status":500}"#;
        let event: PageEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            PageEvent::Response {
                request_id: "7".to_string(),
                url: "http://x/api".to_string(),
                status: 500
            }
        );
    }
}
