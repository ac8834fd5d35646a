//! DOM, CSS and accessibility state verification
//!
//! Every check here is read-only. A selector that matches nothing yields
//! a conservative answer (not visible, not interactive, no match) rather
//! than an error; only driver failures such as a closed page propagate.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;

use crate::config::EngineConfig;
use crate::definition::TextMatchMode;
use crate::driver::Page;
use crate::error::Result;
use crate::evidence::{write_file, EvidenceClock};
use crate::probe::{self, VisibilityState};

/// Whether a user could interact with an element right now
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InteractivityState {
    pub clickable: bool,
    pub disabled: bool,
    /// Sized and styled visible, but something else is on top at its center
    pub covered: bool,
    pub in_viewport: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CssCheck {
    /// `None` when the element does not exist
    pub actual: Option<String>,
    pub expected: String,
    pub matches: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextCheck {
    pub found: bool,
    /// Rendered text, truncated for evidence
    pub actual: String,
    pub expected: String,
    pub mode: TextMatchMode,
    pub matches: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub visible: bool,
    pub interactive: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccessibilityReport {
    pub exists: bool,
    pub has_aria_label: bool,
    pub has_role: bool,
    pub has_aria_labelledby: bool,
    pub has_aria_describedby: bool,
    pub role: Option<String>,
    pub issues: Vec<String>,
}

impl AccessibilityReport {
    pub fn is_clean(&self) -> bool {
        self.exists && self.issues.is_empty()
    }
}

/// Everything known about one element, in one structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementState {
    pub selector: String,
    pub exists: bool,
    pub visibility: VisibilityState,
    pub interactivity: InteractivityState,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl ElementState {
    fn missing(selector: &str) -> Self {
        Self {
            selector: selector.to_string(),
            exists: false,
            visibility: VisibilityState::absent(),
            interactivity: InteractivityState::default(),
            text: None,
            html: None,
        }
    }
}

/// When a DOM snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomPhase {
    Baseline,
    Final,
}

impl DomPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            DomPhase::Baseline => "baseline",
            DomPhase::Final => "final",
        }
    }
}

impl TextMatchMode {
    /// Compare rendered text against an expectation. Regex patterns are
    /// compiled by the caller.
    pub fn matches(&self, actual: &str, expected: &str) -> Result<bool> {
        Ok(match self {
            TextMatchMode::Exact => actual.trim() == expected.trim(),
            TextMatchMode::Contains => actual.contains(expected),
            TextMatchMode::Regex => regex::Regex::new(expected)?.is_match(actual),
        })
    }
}

/// Read-only structural checks against a live page
pub struct StateVerifier {
    dom_dir: PathBuf,
    text_limit: usize,
    clock: EvidenceClock,
}

impl StateVerifier {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            dom_dir: config.dom_snapshots_dir(),
            text_limit: config.text_evidence_limit,
            clock: EvidenceClock::new(),
        }
    }

    pub async fn verify_element_visible(&self, page: &dyn Page, selector: &str) -> Result<VisibilityState> {
        match probe::visibility(page, selector).await {
            Ok(state) => Ok(state),
            Err(e) if e.is_not_found() => Ok(VisibilityState::absent()),
            Err(e) => Err(e),
        }
    }

    pub async fn verify_element_interactive(
        &self,
        page: &dyn Page,
        selector: &str,
    ) -> Result<InteractivityState> {
        match self.interactivity(page, selector).await {
            Ok(state) => Ok(state),
            Err(e) if e.is_not_found() => Ok(InteractivityState::default()),
            Err(e) => Err(e),
        }
    }

    async fn interactivity(&self, page: &dyn Page, selector: &str) -> Result<InteractivityState> {
        let visibility = probe::visibility(page, selector).await?;
        let disabled = probe::is_disabled(page, selector).await?;
        let (rect, on_top) = probe::hit_target(page, selector).await?;
        let viewport = page.viewport().await?;

        let rendered = visibility.visible && visibility.styled_visible();
        Ok(InteractivityState {
            clickable: rendered && on_top,
            disabled,
            covered: rendered && !on_top,
            in_viewport: rect.map(|r| r.has_area() && r.within(viewport)).unwrap_or(false),
        })
    }

    pub async fn verify_css_property(
        &self,
        page: &dyn Page,
        selector: &str,
        property: &str,
        expected: &str,
    ) -> Result<CssCheck> {
        let actual = match page.computed_style(selector, property).await {
            Ok(value) => Some(value.trim().to_string()),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let matches = actual.as_deref() == Some(expected.trim());
        Ok(CssCheck {
            actual,
            expected: expected.to_string(),
            matches,
        })
    }

    pub async fn verify_text_content(
        &self,
        page: &dyn Page,
        selector: &str,
        expected: &str,
        mode: TextMatchMode,
    ) -> Result<TextCheck> {
        let text = match page.text(selector).await {
            Ok(text) => Some(text),
            Err(e) if e.is_not_found() => None,
            Err(e) => return Err(e),
        };
        let matches = match &text {
            Some(text) => mode.matches(text, expected)?,
            None => false,
        };
        Ok(TextCheck {
            found: text.is_some(),
            actual: probe::truncate(text.as_deref().unwrap_or_default(), self.text_limit),
            expected: expected.to_string(),
            mode,
            matches,
        })
    }

    pub async fn get_element_bounding_box(&self, page: &dyn Page, selector: &str) -> Result<Option<ElementBox>> {
        let rect = match page.bounding_box(selector).await {
            Ok(Some(rect)) => rect,
            Ok(None) => return Ok(None),
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let visible = probe::is_visible(page, selector).await?;
        let interactive = probe::clickability(page, selector).await?.is_clickable();
        Ok(Some(ElementBox {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
            visible,
            interactive,
        }))
    }

    pub async fn verify_accessibility(&self, page: &dyn Page, selector: &str) -> Result<AccessibilityReport> {
        let tag = match page.tag_name(selector).await {
            Ok(tag) => tag,
            Err(e) if e.is_not_found() => return Ok(AccessibilityReport::default()),
            Err(e) => return Err(e),
        };
        let aria_label = page.attribute(selector, "aria-label").await?;
        let role = page.attribute(selector, "role").await?;
        let labelledby = page.attribute(selector, "aria-labelledby").await?;
        let describedby = page.attribute(selector, "aria-describedby").await?;
        let has_label = aria_label.as_deref().map(|l| !l.trim().is_empty()).unwrap_or(false)
            || labelledby.is_some();

        let mut issues = Vec::new();
        if tag == "img" && page.attribute(selector, "alt").await?.is_none() && !has_label {
            issues.push("image has no alt text or aria-label".to_string());
        }
        if !probe::is_visible(page, selector).await?
            && page.attribute(selector, "aria-hidden").await?.as_deref() != Some("true")
        {
            issues.push("hidden element is missing aria-hidden".to_string());
        }
        if tag == "button" && page.text(selector).await?.trim().is_empty() && !has_label {
            issues.push("button has no text or accessible label".to_string());
        }

        Ok(AccessibilityReport {
            exists: true,
            has_aria_label: aria_label.is_some(),
            has_role: role.is_some(),
            has_aria_labelledby: labelledby.is_some(),
            has_aria_describedby: describedby.is_some(),
            role,
            issues,
        })
    }

    /// Write the full page markup to `dom-{phase}-{tag}-{millis}.html`
    pub async fn capture_dom_state(&self, page: &dyn Page, phase: DomPhase) -> Result<PathBuf> {
        let html = page.content().await?;
        let name = format!(
            "dom-{}-{}-{}.html",
            phase.as_str(),
            self.clock.tag(),
            self.clock.next_millis()
        );
        let path = write_file(&self.dom_dir, &name, html.as_bytes())?;
        debug!("DOM snapshot saved: {}", path.display());
        Ok(path)
    }

    pub async fn get_element_state(&self, page: &dyn Page, selector: &str) -> Result<ElementState> {
        match self.element_state(page, selector).await {
            Ok(state) => Ok(state),
            Err(e) if e.is_not_found() => Ok(ElementState::missing(selector)),
            Err(e) => Err(e),
        }
    }

    async fn element_state(&self, page: &dyn Page, selector: &str) -> Result<ElementState> {
        if page.count(selector).await? == 0 {
            return Ok(ElementState::missing(selector));
        }
        let visibility = probe::visibility(page, selector).await?;
        let interactivity = self.interactivity(page, selector).await?;
        let text = page.text(selector).await?;
        let html = page.outer_html(selector).await?;
        Ok(ElementState {
            selector: selector.to_string(),
            exists: true,
            visibility,
            interactivity,
            text: Some(probe::truncate(&text, self.text_limit)),
            html: Some(probe::truncate(&html, self.text_limit)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{Browser, LoadState};
    use crate::simulated::{Element, SimulatedBrowser, SiteDocument};
    use crate::definition::Viewport;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use test_case::test_case;

    async fn fixture(tmp: &TempDir) -> (StateVerifier, Arc<dyn Page>) {
        let browser = SimulatedBrowser::new();
        browser.add_document(
            "http://app.test/",
            SiteDocument::new("State")
                .with(
                    Element::new("#title", "h1")
                        .at(0.0, 0.0, 600.0, 40.0)
                        .text("Welcome back, Ada")
                        .style("color", "rgb(0, 0, 0)"),
                )
                .with(Element::new("#save", "button").at(0.0, 60.0, 80.0, 30.0).text("Save"))
                .with(Element::new("#icon", "button").at(100.0, 60.0, 30.0, 30.0))
                .with(
                    Element::new("#close", "button")
                        .at(140.0, 60.0, 30.0, 30.0)
                        .attr("aria-label", "Close"),
                )
                .with(Element::new("#logo", "img").at(200.0, 60.0, 50.0, 50.0))
                .with(Element::new("#off", "button").at(0.0, 120.0, 80.0, 30.0).text("Off").disabled())
                .with(Element::new("#under", "button").at(300.0, 120.0, 80.0, 30.0).text("Under"))
                .with(Element::new("#cover", "div").at(280.0, 100.0, 200.0, 100.0))
                .with(Element::new("#drawer", "div").at(0.0, 200.0, 100.0, 100.0).hidden())
                .with(Element::new("#below", "div").at(0.0, 2000.0, 100.0, 100.0).text("Below")),
        );
        let page = browser.new_page(Viewport::default()).await.unwrap();
        page.goto("http://app.test/", LoadState::Load, Duration::from_secs(1))
            .await
            .unwrap();

        let mut config = EngineConfig::default().with_evidence_dir(tmp.path());
        config.text_evidence_limit = 10;
        (StateVerifier::new(&config), page)
    }

    #[tokio::test]
    async fn test_visibility_is_conservative_for_missing() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let state = verifier.verify_element_visible(page.as_ref(), "#nope").await.unwrap();
        assert_eq!(state, VisibilityState::absent());

        let state = verifier.verify_element_visible(page.as_ref(), "#title").await.unwrap();
        assert!(state.visible);
        assert_eq!(state.display, "block");
    }

    #[tokio::test]
    async fn test_interactivity() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let page = page.as_ref();

        let save = verifier.verify_element_interactive(page, "#save").await.unwrap();
        assert_eq!(
            save,
            InteractivityState { clickable: true, disabled: false, covered: false, in_viewport: true }
        );

        let off = verifier.verify_element_interactive(page, "#off").await.unwrap();
        assert!(off.disabled);

        let under = verifier.verify_element_interactive(page, "#under").await.unwrap();
        assert!(under.covered);
        assert!(!under.clickable);

        let drawer = verifier.verify_element_interactive(page, "#drawer").await.unwrap();
        assert!(!drawer.clickable);
        assert!(!drawer.covered);

        let below = verifier.verify_element_interactive(page, "#below").await.unwrap();
        assert!(!below.in_viewport);

        let missing = verifier.verify_element_interactive(page, "#nope").await.unwrap();
        assert_eq!(missing, InteractivityState::default());
    }

    #[tokio::test]
    async fn test_css_property() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let check = verifier
            .verify_css_property(page.as_ref(), "#title", "color", " rgb(0, 0, 0) ")
            .await
            .unwrap();
        assert!(check.matches);

        let check = verifier
            .verify_css_property(page.as_ref(), "#nope", "color", "red")
            .await
            .unwrap();
        assert_eq!(check.actual, None);
        assert!(!check.matches);
    }

    #[test_case("Welcome back, Ada", TextMatchMode::Exact, true ; "exact")]
    #[test_case("Welcome", TextMatchMode::Exact, false ; "exact partial")]
    #[test_case("back", TextMatchMode::Contains, true ; "contains")]
    #[test_case("^Welcome .*, \\w+$", TextMatchMode::Regex, true ; "regex")]
    #[tokio::test]
    async fn test_text_modes(expected: &str, mode: TextMatchMode, matches: bool) {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let check = verifier
            .verify_text_content(page.as_ref(), "#title", expected, mode)
            .await
            .unwrap();
        assert_eq!(check.matches, matches);
        assert_eq!(check.actual, "Welcome ba…");
    }

    #[tokio::test]
    async fn test_bounding_box() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let rect = verifier.get_element_bounding_box(page.as_ref(), "#save").await.unwrap().unwrap();
        assert_eq!((rect.x, rect.y, rect.width, rect.height), (0.0, 60.0, 80.0, 30.0));
        assert!(rect.visible && rect.interactive);

        assert!(verifier.get_element_bounding_box(page.as_ref(), "#nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accessibility_issues() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let page = page.as_ref();

        assert!(verifier.verify_accessibility(page, "#save").await.unwrap().is_clean());

        let close = verifier.verify_accessibility(page, "#close").await.unwrap();
        assert!(close.has_aria_label);
        assert!(close.is_clean());

        let icon = verifier.verify_accessibility(page, "#icon").await.unwrap();
        assert_eq!(icon.issues, vec!["button has no text or accessible label".to_string()]);

        let logo = verifier.verify_accessibility(page, "#logo").await.unwrap();
        assert_eq!(logo.issues, vec!["image has no alt text or aria-label".to_string()]);

        let drawer = verifier.verify_accessibility(page, "#drawer").await.unwrap();
        assert_eq!(drawer.issues, vec!["hidden element is missing aria-hidden".to_string()]);

        assert!(!verifier.verify_accessibility(page, "#nope").await.unwrap().exists);
    }

    #[tokio::test]
    async fn test_dom_capture_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let first = verifier.capture_dom_state(page.as_ref(), DomPhase::Baseline).await.unwrap();
        let second = verifier.capture_dom_state(page.as_ref(), DomPhase::Baseline).await.unwrap();

        assert_ne!(first, second);
        assert!(first.starts_with(tmp.path().join("dom-snapshots")));
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("dom-baseline-") && name.ends_with(".html"));
        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[tokio::test]
    async fn test_verifiers_sharing_a_directory_never_overwrite() {
        let tmp = TempDir::new().unwrap();
        let (first, page) = fixture(&tmp).await;
        let second = StateVerifier::new(&EngineConfig::default().with_evidence_dir(tmp.path()));

        let mut paths = std::collections::HashSet::new();
        for _ in 0..20 {
            let (a, b) = tokio::join!(
                first.capture_dom_state(page.as_ref(), DomPhase::Final),
                second.capture_dom_state(page.as_ref(), DomPhase::Final)
            );
            assert!(paths.insert(a.unwrap()));
            assert!(paths.insert(b.unwrap()));
        }
        assert_eq!(std::fs::read_dir(tmp.path().join("dom-snapshots")).unwrap().count(), 40);
    }

    #[tokio::test]
    async fn test_element_state() {
        let tmp = TempDir::new().unwrap();
        let (verifier, page) = fixture(&tmp).await;
        let state = verifier.get_element_state(page.as_ref(), "#save").await.unwrap();
        assert!(state.exists);
        assert!(state.interactivity.clickable);
        assert_eq!(state.text.as_deref(), Some("Save"));

        let missing = verifier.get_element_state(page.as_ref(), "#nope").await.unwrap();
        assert!(!missing.exists);
        assert!(!missing.visibility.visible);
    }
}
