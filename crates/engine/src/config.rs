//! Engine configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::definition::Viewport;
use crate::error::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root for evidence; screenshots and DOM snapshots live below it
    pub evidence_dir: PathBuf,

    /// Viewport used when a definition does not set one
    pub default_viewport: Viewport,

    /// Maximum characters of element text kept as evidence
    pub text_evidence_limit: usize,

    /// Append a failure when the console logged unexpected errors
    pub assert_console_clean: bool,

    /// Append a failure when any request failed
    pub assert_network_clean: bool,

    pub timing: TimingConfig,

    pub visual: VisualConfig,

    pub console: ConsoleConfig,

    pub network: NetworkConfig,

    pub browser: BrowserConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            evidence_dir: PathBuf::from("test-results"),
            default_viewport: Viewport::default(),
            text_evidence_limit: 200,
            assert_console_clean: true,
            assert_network_clean: true,
            timing: TimingConfig::default(),
            visual: VisualConfig::default(),
            console: ConsoleConfig::default(),
            network: NetworkConfig::default(),
            browser: BrowserConfig::default(),
        }
    }
}

/// Timeouts and pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Initial navigation, including the network-idle wait
    pub navigation_timeout_ms: u64,

    /// Implicit visibility waits inside actions
    pub element_timeout_ms: u64,

    /// Interval between probes in polling waits
    pub poll_interval_ms: u64,

    /// Pause after hover so tooltips and menus finish animating
    pub hover_settle_ms: u64,

    /// Intermediate mouse moves during a drag
    pub drag_steps: u32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            navigation_timeout_ms: 30_000,
            element_timeout_ms: 5_000,
            poll_interval_ms: 50,
            hover_settle_ms: 300,
            drag_steps: 10,
        }
    }
}

impl TimingConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn hover_settle(&self) -> Duration {
        Duration::from_millis(self.hover_settle_ms)
    }
}

/// Visual evidence settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualConfig {
    /// Percentage of changed pixels tolerated (0.0 - 100.0)
    pub threshold_percent: f64,

    /// Per-channel difference below which pixels count as equal
    pub pixel_tolerance: u8,

    /// Write a highlighted diff image when pixels changed
    pub write_diff_images: bool,

    /// Screenshots older than this are removed by retention cleanup
    pub retention_days: u32,

    /// Crop the element of a failed expectation into its own screenshot
    pub capture_failed_elements: bool,
}

impl Default for VisualConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 0.5,
            pixel_tolerance: 5,
            write_diff_images: true,
            retention_days: 7,
            capture_failed_elements: true,
        }
    }
}

/// Console anomaly settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    /// Regexes for messages that are expected and never count as anomalies
    pub ignore_patterns: Vec<String>,

    /// Treat warnings like errors
    pub fail_on_warnings: bool,
}

/// Network anomaly settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Regexes for URLs whose failures are ignored (analytics, favicons, ...)
    pub ignore_url_patterns: Vec<String>,

    /// Count 3xx responses as failures
    pub redirects_are_failures: bool,
}

/// Which engine Playwright launches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "chromium" | "chrome" => Ok(BrowserKind::Chromium),
            "firefox" => Ok(BrowserKind::Firefox),
            "webkit" | "safari" => Ok(BrowserKind::Webkit),
            other => Err(Error::InvalidConfig(format!("unknown browser: {}", other))),
        }
    }
}

/// Playwright bridge settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub kind: BrowserKind,

    pub headless: bool,

    /// Node executable used to host the bridge
    pub node_binary: PathBuf,

    /// Directory whose `node_modules` provides `playwright`
    pub working_dir: Option<PathBuf>,

    pub launch_timeout_ms: u64,

    /// Upper bound for a single bridge call
    pub call_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            kind: BrowserKind::Chromium,
            headless: true,
            node_binary: PathBuf::from("node"),
            working_dir: None,
            launch_timeout_ms: 30_000,
            call_timeout_ms: 60_000,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.timing.poll_interval_ms == 0 {
            return Err(Error::InvalidConfig("timing.poll_interval_ms must be > 0".to_string()));
        }
        if !(0.0..=100.0).contains(&self.visual.threshold_percent) {
            return Err(Error::InvalidConfig(format!(
                "visual.threshold_percent must be within 0-100, got {}",
                self.visual.threshold_percent
            )));
        }
        if self.default_viewport.width == 0 || self.default_viewport.height == 0 {
            return Err(Error::InvalidConfig("default_viewport must be non-zero".to_string()));
        }
        for pattern in self.console.ignore_patterns.iter().chain(&self.network.ignore_url_patterns) {
            regex::Regex::new(pattern)?;
        }
        Ok(())
    }

    /// Get the screenshot directory
    pub fn screenshots_dir(&self) -> PathBuf {
        self.evidence_dir.join("screenshots")
    }

    /// Get the DOM snapshot directory
    pub fn dom_snapshots_dir(&self) -> PathBuf {
        self.evidence_dir.join("dom-snapshots")
    }

    /// Point all evidence at `dir`
    pub fn with_evidence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.evidence_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.visual.threshold_percent, 0.5);
        assert_eq!(config.screenshots_dir(), PathBuf::from("test-results/screenshots"));
        assert_eq!(config.dom_snapshots_dir(), PathBuf::from("test-results/dom-snapshots"));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = EngineConfig::load(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.timing.poll_interval_ms, 50);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("uiproof.toml");
        std::fs::write(
            &path,
            "evidence_dir = \"/tmp/evidence\"\n[timing]\nhover_settle_ms = 50\n[browser]\nkind = \"firefox\"\n",
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.evidence_dir, PathBuf::from("/tmp/evidence"));
        assert_eq!(config.timing.hover_settle_ms, 50);
        assert_eq!(config.timing.drag_steps, 10);
        assert_eq!(config.browser.kind, BrowserKind::Firefox);
    }

    #[test]
    fn test_save_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("uiproof.toml");
        let mut config = EngineConfig::default();
        config.console.ignore_patterns.push("favicon".to_string());
        config.save(&path).unwrap();

        let loaded = EngineConfig::load(&path).unwrap();
        assert_eq!(loaded.console.ignore_patterns, vec!["favicon".to_string()]);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = EngineConfig::default();
        config.visual.threshold_percent = 150.0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_ignore_pattern_rejected() {
        let mut config = EngineConfig::default();
        config.network.ignore_url_patterns.push("(".to_string());
        assert!(matches!(config.validate(), Err(Error::Regex(_))));
    }
}
