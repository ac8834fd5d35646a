//! Screenshot evidence and visual comparison
//!
//! Each [`VisualVerifier`] owns a registry mapping the screenshots it wrote
//! to their metadata. The registry is the only record used for retention
//! cleanup; nothing here scans the evidence directory.

use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use image::{GenericImageView, Rgba, RgbaImage};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{EngineConfig, VisualConfig};
use crate::definition::Viewport;
use crate::driver::{BoundingBox, Page, ScreenshotOptions};
use crate::error::{Error, Result};
use crate::evidence::{sanitize, write_file, EvidenceClock};
use crate::probe;

/// Point in the run a screenshot belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotPhase {
    Baseline,
    BeforeAction,
    AfterAction,
    Final,
}

impl ScreenshotPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotPhase::Baseline => "baseline",
            ScreenshotPhase::BeforeAction => "before_action",
            ScreenshotPhase::AfterAction => "after_action",
            ScreenshotPhase::Final => "final",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureKind {
    #[serde(rename = "fullpage")]
    FullPage,
    Element,
}

impl CaptureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::FullPage => "fullpage",
            CaptureKind::Element => "element",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotMetadata {
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    pub viewport: Viewport,
    pub phase: ScreenshotPhase,
    pub kind: CaptureKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    /// SHA-256 of the PNG bytes
    pub sha256: String,
}

/// How two screenshots are compared
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiffConfig {
    /// Percentage of changed pixels tolerated (0.0 - 100.0)
    pub threshold_percent: f64,
    /// Per-channel difference below which pixels count as equal
    pub pixel_tolerance: u8,
    /// Regions (image pixels) excluded from the comparison
    #[serde(default)]
    pub ignore_regions: Vec<BoundingBox>,
    pub write_diff_image: bool,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self::from(&VisualConfig::default())
    }
}

impl From<&VisualConfig> for DiffConfig {
    fn from(config: &VisualConfig) -> Self {
        Self {
            threshold_percent: config.threshold_percent,
            pixel_tolerance: config.pixel_tolerance,
            ignore_regions: Vec::new(),
            write_diff_image: config.write_diff_images,
        }
    }
}

impl DiffConfig {
    pub fn ignore(mut self, region: BoundingBox) -> Self {
        self.ignore_regions.push(region);
        self
    }

    fn ignored(&self, x: u32, y: u32) -> bool {
        let point = crate::driver::Point {
            x: x as f64 + 0.5,
            y: y as f64 + 0.5,
        };
        self.ignore_regions.iter().any(|r| r.contains(point))
    }
}

/// Result of a visual comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualDiff {
    /// Byte-identical files
    pub identical: bool,

    /// Within the configured threshold
    pub matches: bool,

    /// Percentage of compared pixels that differ
    pub percent_different: f64,

    pub pixels_changed: u64,

    /// Pixels compared, excluding ignored regions
    pub total_pixels: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diff_path: Option<PathBuf>,

    pub before_hash: String,

    pub after_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub visible_elements: Vec<String>,
    pub hidden_elements: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub cleaned: usize,
    pub failed_count: usize,
}

/// Captures screenshots and compares them
pub struct VisualVerifier {
    screenshots_dir: PathBuf,
    config: VisualConfig,
    registry: RwLock<HashMap<PathBuf, ScreenshotMetadata>>,
    clock: EvidenceClock,
}

impl VisualVerifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            screenshots_dir: config.screenshots_dir(),
            config: config.visual.clone(),
            registry: RwLock::new(HashMap::new()),
            clock: EvidenceClock::new(),
        }
    }

    pub fn screenshots_dir(&self) -> &Path {
        &self.screenshots_dir
    }

    /// Screenshot of the whole scrollable page
    pub async fn capture_full_page(
        &self,
        page: &dyn Page,
        phase: ScreenshotPhase,
        action_id: Option<&str>,
    ) -> Result<PathBuf> {
        let bytes = page.screenshot(ScreenshotOptions::full_page()).await?;
        self.store(page, bytes, phase, CaptureKind::FullPage, action_id, None)
            .await
    }

    /// Screenshot cropped to one element's box
    pub async fn capture_element(
        &self,
        page: &dyn Page,
        selector: &str,
        phase: ScreenshotPhase,
        action_id: Option<&str>,
    ) -> Result<PathBuf> {
        if page.count(selector).await? == 0 {
            return Err(Error::not_found(selector));
        }
        let mut rect = Self::element_box(page, selector).await?;
        let viewport = page.viewport().await?;
        if !rect.within(viewport) {
            // viewport screenshots only cover what is on screen
            page.scroll_into_view(selector).await?;
            rect = Self::element_box(page, selector).await?;
        }

        let bytes = page.screenshot(ScreenshotOptions::clip(rect)).await?;
        self.store(page, bytes, phase, CaptureKind::Element, action_id, Some(selector))
            .await
    }

    async fn element_box(page: &dyn Page, selector: &str) -> Result<BoundingBox> {
        page.bounding_box(selector)
            .await?
            .filter(BoundingBox::has_area)
            .ok_or_else(|| Error::NoBoundingBox {
                selector: selector.to_string(),
            })
    }

    /// Capture several elements; selectors that fail are logged and skipped
    pub async fn capture_elements(
        &self,
        page: &dyn Page,
        selectors: &[String],
        phase: ScreenshotPhase,
        action_id: Option<&str>,
    ) -> HashMap<String, PathBuf> {
        let mut captured = HashMap::new();
        for selector in selectors {
            match self.capture_element(page, selector, phase, action_id).await {
                Ok(path) => {
                    captured.insert(selector.clone(), path);
                }
                Err(e) => warn!("Skipping element capture for {}: {}", selector, e),
            }
        }
        captured
    }

    async fn store(
        &self,
        page: &dyn Page,
        bytes: Vec<u8>,
        phase: ScreenshotPhase,
        kind: CaptureKind,
        action_id: Option<&str>,
        selector: Option<&str>,
    ) -> Result<PathBuf> {
        let url = page.url().await?;
        let viewport = page.viewport().await?;
        let timestamp = self.clock.next_millis();

        let mut name = format!("{}-{}", phase.as_str(), kind.as_str());
        if let Some(selector) = selector {
            name.push('-');
            name.push_str(&sanitize(selector));
        }
        if let Some(action_id) = action_id {
            name.push('-');
            name.push_str(&sanitize(action_id));
        }
        name.push_str(&format!("-{}-{}.png", self.clock.tag(), timestamp));

        let path = write_file(&self.screenshots_dir, &name, &bytes)?;
        debug!("Screenshot saved: {}", path.display());

        let metadata = ScreenshotMetadata {
            path: path.clone(),
            timestamp: Utc.timestamp_millis_opt(timestamp).single().unwrap_or_else(Utc::now),
            url,
            viewport,
            phase,
            kind,
            action_id: action_id.map(String::from),
            selector: selector.map(String::from),
            sha256: hash_bytes(&bytes),
        };
        self.registry.write().insert(path.clone(), metadata);
        Ok(path)
    }

    pub fn metadata(&self, path: &Path) -> Option<ScreenshotMetadata> {
        self.registry.read().get(path).cloned()
    }

    /// Every screenshot this verifier wrote and still tracks, oldest first
    pub fn screenshots(&self) -> Vec<ScreenshotMetadata> {
        let mut all: Vec<_> = self.registry.read().values().cloned().collect();
        all.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.path.cmp(&b.path)));
        all
    }

    /// Diff settings from this verifier's configuration
    pub fn diff_config(&self) -> DiffConfig {
        DiffConfig::from(&self.config)
    }

    /// Compare two screenshots pixel by pixel
    pub fn generate_visual_diff(&self, before: &Path, after: &Path, config: &DiffConfig) -> Result<VisualDiff> {
        let before_bytes = std::fs::read(before)?;
        let after_bytes = std::fs::read(after)?;
        let before_hash = hash_bytes(&before_bytes);
        let after_hash = hash_bytes(&after_bytes);

        let before_img = image::load_from_memory(&before_bytes)?;
        let after_img = image::load_from_memory(&after_bytes)?;

        // Quick hash comparison
        if before_hash == after_hash {
            debug!("Screenshots match exactly (same hash)");
            return Ok(VisualDiff {
                identical: true,
                matches: true,
                percent_different: 0.0,
                pixels_changed: 0,
                total_pixels: after_img.width() as u64 * after_img.height() as u64,
                diff_path: None,
                before_hash,
                after_hash,
            });
        }

        if before_img.dimensions() != after_img.dimensions() {
            warn!(
                "Screenshot dimensions differ: before {:?} vs after {:?}",
                before_img.dimensions(),
                after_img.dimensions()
            );
        }

        let before_rgba = before_img.to_rgba8();
        let after_rgba = after_img.to_rgba8();
        let width = before_rgba.width().max(after_rgba.width());
        let height = before_rgba.height().max(after_rgba.height());

        let mut diff_img = RgbaImage::new(width, height);
        let mut pixels_changed = 0u64;
        let mut total_pixels = 0u64;

        for y in 0..height {
            for x in 0..width {
                if config.ignored(x, y) {
                    diff_img.put_pixel(x, y, Rgba([0, 0, 255, 64]));
                    continue;
                }
                total_pixels += 1;

                let a = pixel_at(&before_rgba, x, y);
                let b = pixel_at(&after_rgba, x, y);
                let changed = match (a, b) {
                    (Some(a), Some(b)) => pixels_differ(a, b, config.pixel_tolerance),
                    // outside the overlap of differently sized images
                    _ => true,
                };

                if changed {
                    pixels_changed += 1;
                    diff_img.put_pixel(x, y, Rgba([255, 0, 0, 255]));
                } else if let Some(p) = b {
                    diff_img.put_pixel(x, y, Rgba([p[0] / 2, p[1] / 2, p[2] / 2, 128]));
                }
            }
        }

        let percent_different = if total_pixels == 0 {
            0.0
        } else {
            pixels_changed as f64 / total_pixels as f64 * 100.0
        };
        let matches = percent_different <= config.threshold_percent;

        let diff_path = if pixels_changed > 0 && config.write_diff_image {
            let dir = after.parent().unwrap_or(self.screenshots_dir.as_path());
            let stem = after
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "after".to_string());
            let path = dir.join(format!("diff-{}-{}.png", stem, self.clock.next_millis()));
            diff_img.save(&path)?;
            Some(path)
        } else {
            None
        };

        if !matches {
            warn!(
                "Visual difference between {} and {}: {:.2}% pixels differ (threshold: {:.2}%)",
                before.display(),
                after.display(),
                percent_different,
                config.threshold_percent
            );
        }

        Ok(VisualDiff {
            identical: false,
            matches,
            percent_different,
            pixels_changed,
            total_pixels,
            diff_path,
            before_hash,
            after_hash,
        })
    }

    /// Consistent when every selector is currently visible
    pub async fn verify_visual_consistency(&self, page: &dyn Page, selectors: &[String]) -> Result<ConsistencyReport> {
        let mut report = ConsistencyReport::default();
        for selector in selectors {
            let visible = match probe::is_visible(page, selector).await {
                Ok(visible) => visible,
                Err(e) if e.is_not_found() => false,
                Err(e) => return Err(e),
            };
            if visible {
                report.visible_elements.push(selector.clone());
            } else {
                report.hidden_elements.push(selector.clone());
            }
        }
        report.consistent = report.hidden_elements.is_empty();
        Ok(report)
    }

    /// Delete tracked screenshots older than the retention window
    pub fn cleanup_old_screenshots(&self, retention_days: u32) -> CleanupReport {
        let cutoff = Utc::now() - ChronoDuration::days(retention_days as i64);
        let expired: Vec<PathBuf> = self
            .registry
            .read()
            .values()
            .filter(|m| m.timestamp <= cutoff)
            .map(|m| m.path.clone())
            .collect();

        let mut report = CleanupReport::default();
        for path in expired {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    self.registry.write().remove(&path);
                    report.cleaned += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    self.registry.write().remove(&path);
                    report.cleaned += 1;
                }
                Err(e) => {
                    warn!("Failed to delete screenshot {}: {}", path.display(), e);
                    report.failed_count += 1;
                }
            }
        }

        if report.cleaned > 0 {
            info!("Cleaned up {} old screenshots", report.cleaned);
        }
        report
    }

    /// Retention cleanup with the configured window
    pub fn cleanup_expired(&self) -> CleanupReport {
        self.cleanup_old_screenshots(self.config.retention_days)
    }
}

fn pixel_at(image: &RgbaImage, x: u32, y: u32) -> Option<[u8; 4]> {
    if x < image.width() && y < image.height() {
        Some(image.get_pixel(x, y).0)
    } else {
        None
    }
}

/// Check if two pixels differ beyond the tolerance on any channel
fn pixels_differ(a: [u8; 4], b: [u8; 4], tolerance: u8) -> bool {
    a.iter()
        .zip(b.iter())
        .any(|(a, b)| (*a as i32 - *b as i32).abs() > tolerance as i32)
}

fn hash_bytes(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Browser, LoadState};
    use crate::simulated::{Effect, Element, SimulatedBrowser, SiteDocument};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn fixture(tmp: &TempDir) -> (VisualVerifier, Arc<dyn Page>) {
        let browser = SimulatedBrowser::new();
        browser.add_document(
            "http://app.test/",
            SiteDocument::new("Visual")
                .with(
                    Element::new("#hero", "section")
                        .at(0.0, 0.0, 400.0, 200.0)
                        .style("background-color", "navy"),
                )
                .with(
                    Element::new("#cta", "button")
                        .at(20.0, 250.0, 100.0, 40.0)
                        .text("Buy")
                        .on_click(Effect::SetText { selector: "#cta".into(), text: "Bought".into() }),
                )
                .with(Element::new("#modal", "div").at(0.0, 0.0, 200.0, 200.0).hidden())
                .with(Element::new("#footer", "footer").at(0.0, 1200.0, 400.0, 100.0)),
        );
        let page = browser.new_page(Viewport { width: 400, height: 600 }).await.unwrap();
        page.goto("http://app.test/", LoadState::Load, Duration::from_secs(1))
            .await
            .unwrap();
        let config = EngineConfig::default().with_evidence_dir(tmp.path());
        (VisualVerifier::new(&config), page)
    }

    fn solid(path: &Path, width: u32, height: u32, color: [u8; 4]) {
        RgbaImage::from_pixel(width, height, Rgba(color)).save(path).unwrap();
    }

    #[tokio::test]
    async fn test_capture_full_page_registers_metadata() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let path = verifier
            .capture_full_page(page.as_ref(), ScreenshotPhase::Baseline, None)
            .await
            .unwrap();

        assert!(path.exists());
        assert!(path.starts_with(tmp.path().join("screenshots")));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("baseline-fullpage-"), "{}", name);

        let meta = verifier.metadata(&path).unwrap();
        assert_eq!(meta.url, "http://app.test/");
        assert_eq!(meta.kind, CaptureKind::FullPage);

        // full page includes the off-screen footer
        let img = image::open(&path).unwrap();
        assert_eq!(img.height(), 1300);
    }

    #[tokio::test]
    async fn test_capture_element_names_and_crops() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let path = verifier
            .capture_element(page.as_ref(), "#cta", ScreenshotPhase::AfterAction, Some("a1"))
            .await
            .unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("after_action-element-cta-a1-"), "{}", name);
        assert_eq!(image::open(&path).unwrap().dimensions(), (100, 40));
        assert_eq!(verifier.metadata(&path).unwrap().selector.as_deref(), Some("#cta"));
    }

    #[tokio::test]
    async fn test_capture_element_below_the_fold() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let path = verifier
            .capture_element(page.as_ref(), "#footer", ScreenshotPhase::Final, None)
            .await
            .unwrap();
        assert_eq!(image::open(&path).unwrap().dimensions(), (400, 100));
        let rect = page.bounding_box("#footer").await.unwrap().unwrap();
        assert!(rect.within(Viewport { width: 400, height: 600 }));
    }

    #[tokio::test]
    async fn test_verifiers_sharing_a_directory_use_distinct_names() {
        let tmp = TempDir::new().unwrap();
        let (first, page) = fixture(&tmp).await;
        let second = VisualVerifier::new(&EngineConfig::default().with_evidence_dir(tmp.path()));
        let a = first
            .capture_full_page(page.as_ref(), ScreenshotPhase::Final, None)
            .await
            .unwrap();
        let b = second
            .capture_full_page(page.as_ref(), ScreenshotPhase::Final, None)
            .await
            .unwrap();
        assert_ne!(a, b);
        assert!(first.metadata(&b).is_none());
        assert!(second.metadata(&a).is_none());
    }

    #[tokio::test]
    async fn test_capture_element_missing_vs_hidden() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let missing = verifier
            .capture_element(page.as_ref(), "#ghost", ScreenshotPhase::Final, None)
            .await
            .unwrap_err();
        assert!(matches!(missing, Error::ElementNotFound { .. }));
        assert!(missing.to_string().contains("#ghost"));

        let hidden = verifier
            .capture_element(page.as_ref(), "#modal", ScreenshotPhase::Final, None)
            .await
            .unwrap_err();
        assert!(matches!(hidden, Error::NoBoundingBox { .. }));
    }

    #[tokio::test]
    async fn test_capture_elements_is_best_effort() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let selectors = vec!["#hero".to_string(), "#ghost".to_string(), "#cta".to_string()];
        let captured = verifier
            .capture_elements(page.as_ref(), &selectors, ScreenshotPhase::Final, None)
            .await;
        assert_eq!(captured.len(), 2);
        assert!(!captured.contains_key("#ghost"));
    }

    #[tokio::test]
    async fn test_diff_detects_change_after_action() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let before = verifier
            .capture_full_page(page.as_ref(), ScreenshotPhase::BeforeAction, Some("a1"))
            .await
            .unwrap();
        let same = verifier
            .capture_full_page(page.as_ref(), ScreenshotPhase::BeforeAction, Some("a1"))
            .await
            .unwrap();
        page.click("#cta").await.unwrap();
        let after = verifier
            .capture_full_page(page.as_ref(), ScreenshotPhase::AfterAction, Some("a1"))
            .await
            .unwrap();

        let config = verifier.diff_config();
        let unchanged = verifier.generate_visual_diff(&before, &same, &config).unwrap();
        assert!(unchanged.identical && unchanged.matches);

        let diff = verifier.generate_visual_diff(&before, &after, &config).unwrap();
        assert!(!diff.identical);
        assert_eq!(diff.pixels_changed, 100 * 40);
        assert!(diff.diff_path.as_ref().unwrap().exists());

        // ignoring the button hides the change
        let ignoring = config.clone().ignore(BoundingBox::new(20.0, 250.0, 100.0, 40.0));
        let diff = verifier.generate_visual_diff(&before, &after, &ignoring).unwrap();
        assert_eq!(diff.pixels_changed, 0);
        assert!(diff.matches);
    }

    #[test]
    fn test_diff_threshold_tolerance_and_dimensions() {
        let tmp = TempDir::new().unwrap();
        let config = EngineConfig::default().with_evidence_dir(tmp.path());
        let verifier = VisualVerifier::new(&config);
        let a = tmp.path().join("a.png");
        let b = tmp.path().join("b.png");
        let c = tmp.path().join("c.png");
        solid(&a, 10, 10, [100, 100, 100, 255]);
        solid(&b, 10, 10, [103, 100, 100, 255]);
        solid(&c, 10, 20, [100, 100, 100, 255]);

        let diff_config = DiffConfig { write_diff_image: false, ..DiffConfig::default() };
        let within = verifier.generate_visual_diff(&a, &b, &diff_config).unwrap();
        assert!(!within.identical);
        assert_eq!(within.pixels_changed, 0);

        let taller = verifier.generate_visual_diff(&a, &c, &diff_config).unwrap();
        assert_eq!(taller.total_pixels, 200);
        assert_eq!(taller.pixels_changed, 100);
        assert_eq!(taller.percent_different, 50.0);
        assert!(!taller.matches);
        assert!(taller.diff_path.is_none());
    }

    #[tokio::test]
    async fn test_visual_consistency() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let selectors = vec!["#hero".to_string(), "#modal".to_string(), "#ghost".to_string()];
        let report = verifier.verify_visual_consistency(page.as_ref(), &selectors).await.unwrap();
        assert!(!report.consistent);
        assert_eq!(report.visible_elements, vec!["#hero".to_string()]);
        assert_eq!(report.hidden_elements, vec!["#modal".to_string(), "#ghost".to_string()]);
    }

    #[tokio::test]
    async fn test_cleanup_uses_registry() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let kept = verifier
            .capture_full_page(page.as_ref(), ScreenshotPhase::Final, None)
            .await
            .unwrap();
        assert_eq!(verifier.cleanup_old_screenshots(7), CleanupReport::default());
        assert!(kept.exists());

        // an untracked file is never touched
        let stray = tmp.path().join("screenshots").join("stray.png");
        solid(&stray, 2, 2, [0, 0, 0, 255]);

        // a tracked entry that cannot be deleted is counted, not raised
        let stuck = tmp.path().join("screenshots").join("stuck.png");
        std::fs::create_dir_all(&stuck).unwrap();
        let mut meta = verifier.metadata(&kept).unwrap();
        meta.path = stuck.clone();
        verifier.registry.write().insert(stuck.clone(), meta);

        let report = verifier.cleanup_old_screenshots(0);
        assert_eq!(report, CleanupReport { cleaned: 1, failed_count: 1 });
        assert!(!kept.exists());
        assert!(stray.exists());
        assert_eq!(verifier.screenshots().len(), 1);
    }
}
