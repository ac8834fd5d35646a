//! Error types for UI verification

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Element not clickable: {selector} ({reason})")]
    NotClickable { selector: String, reason: String },

    #[error("Element has no bounding box: {selector}")]
    NoBoundingBox { selector: String },

    #[error("Timeout after {timeout_ms} ms waiting for: {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Browser driver not found. Install with: npm install playwright && npx playwright install")]
    DriverNotFound,

    #[error("Driver protocol error: {0}")]
    Protocol(String),

    #[error("Page is closed: {0}")]
    PageClosed(String),

    #[error("Invalid test definition: {0}")]
    InvalidDefinition(String),

    #[error("Invalid action {action_id}: {reason}")]
    InvalidAction { action_id: String, reason: String },

    #[error("Invalid expectation {expectation_id}: {reason}")]
    InvalidExpectation {
        expectation_id: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl Error {
    pub fn driver(msg: impl Into<String>) -> Self {
        Error::Driver(msg.into())
    }

    pub fn not_found(selector: impl Into<String>) -> Self {
        Error::ElementNotFound {
            selector: selector.into(),
        }
    }

    pub fn timeout(what: impl Into<String>, timeout_ms: u64) -> Self {
        Error::Timeout {
            what: what.into(),
            timeout_ms,
        }
    }

    /// True for lookups that failed because the selector matched nothing.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::ElementNotFound { .. })
    }

    /// Render this error followed by its `source()` chain, one cause per line.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

pub type Result<T> = std::result::Result<T, Error>;
