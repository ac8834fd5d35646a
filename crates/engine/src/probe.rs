//! Read-only probes over a page
//!
//! These are the building blocks shared by waits, actions and the
//! verifiers. Unlike the verifier API they propagate
//! `Error::ElementNotFound`, so callers decide how conservative to be.

use serde::{Deserialize, Serialize};

use crate::driver::{BoundingBox, Page};
use crate::error::Result;

/// Computed visibility of one element
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisibilityState {
    pub visible: bool,
    pub display: String,
    pub visibility: String,
    pub opacity: f64,
    pub hidden: bool,
}

impl VisibilityState {
    /// State reported for elements that could not be found
    pub fn absent() -> Self {
        Self {
            visible: false,
            display: "none".to_string(),
            visibility: "hidden".to_string(),
            opacity: 0.0,
            hidden: true,
        }
    }

    /// CSS alone does not hide the element
    pub fn styled_visible(&self) -> bool {
        self.display != "none" && self.visibility != "hidden" && self.visibility != "collapse"
    }
}

/// Why an element cannot receive a click
#[derive(Debug, Clone, PartialEq)]
pub enum Clickability {
    Clickable,
    HiddenByStyle { display: String, visibility: String },
    ZeroSize,
    Disabled,
    Covered,
}

impl Clickability {
    pub fn is_clickable(&self) -> bool {
        matches!(self, Clickability::Clickable)
    }

    pub fn reason(&self) -> String {
        match self {
            Clickability::Clickable => "clickable".to_string(),
            Clickability::HiddenByStyle { display, visibility } => {
                format!("hidden by style (display: {}, visibility: {})", display, visibility)
            }
            Clickability::ZeroSize => "element has no size".to_string(),
            Clickability::Disabled => "element is disabled".to_string(),
            Clickability::Covered => "another element covers its center point".to_string(),
        }
    }
}

pub async fn visibility(page: &dyn Page, selector: &str) -> Result<VisibilityState> {
    let display = page.computed_style(selector, "display").await?;
    let visibility = page.computed_style(selector, "visibility").await?;
    let opacity = page
        .computed_style(selector, "opacity")
        .await?
        .trim()
        .parse::<f64>()
        .unwrap_or(1.0);
    let hidden = page.attribute(selector, "hidden").await?.is_some();
    let rect = page.bounding_box(selector).await?;

    let visible = rect.map(|b| b.has_area()).unwrap_or(false);

    Ok(VisibilityState {
        visible,
        display: display.trim().to_string(),
        visibility: visibility.trim().to_string(),
        opacity,
        hidden,
    })
}

/// Visible and laid out with area; the check element waits poll on
pub async fn is_visible(page: &dyn Page, selector: &str) -> Result<bool> {
    let state = visibility(page, selector).await?;
    Ok(state.visible && state.styled_visible())
}

/// Disabled via the DOM property, `aria-disabled="true"` or the attribute
pub async fn is_disabled(page: &dyn Page, selector: &str) -> Result<bool> {
    let property = page.property(selector, "disabled").await?;
    if property.as_bool().unwrap_or(false) {
        return Ok(true);
    }
    if page.attribute(selector, "aria-disabled").await?.as_deref() == Some("true") {
        return Ok(true);
    }
    Ok(page.attribute(selector, "disabled").await?.is_some())
}

/// Box plus center-point hit test; `None` when the element has no box
pub async fn hit_target(page: &dyn Page, selector: &str) -> Result<(Option<BoundingBox>, bool)> {
    let rect = match page.bounding_box(selector).await? {
        Some(rect) if rect.has_area() => rect,
        other => return Ok((other, false)),
    };
    let on_top = page.hit_test(selector, rect.center()).await?;
    Ok((Some(rect), on_top))
}

/// Full clickability verdict: style, size, enabled state, hit test
pub async fn clickability(page: &dyn Page, selector: &str) -> Result<Clickability> {
    let state = visibility(page, selector).await?;
    if !state.styled_visible() {
        return Ok(Clickability::HiddenByStyle {
            display: state.display,
            visibility: state.visibility,
        });
    }
    if !state.visible {
        return Ok(Clickability::ZeroSize);
    }
    if is_disabled(page, selector).await? {
        return Ok(Clickability::Disabled);
    }
    let (_, on_top) = hit_target(page, selector).await?;
    if on_top {
        Ok(Clickability::Clickable)
    } else {
        Ok(Clickability::Covered)
    }
}

/// Cut `text` to at most `limit` characters, marking the cut
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::{Element, SimulatedBrowser, SiteDocument};
    use crate::driver::Browser;
    use crate::definition::Viewport;
    use std::time::Duration;

    async fn page_with(elements: Vec<Element>) -> std::sync::Arc<dyn Page> {
        let browser = SimulatedBrowser::new();
        let mut doc = SiteDocument::new("Probe");
        for element in elements {
            doc = doc.with(element);
        }
        browser.add_document("http://app.test/", doc);
        let page = browser.new_page(Viewport::default()).await.unwrap();
        page.goto("http://app.test/", crate::driver::LoadState::Load, Duration::from_secs(1))
            .await
            .unwrap();
        page
    }

    #[tokio::test]
    async fn test_clickability_reasons() {
        let page = page_with(vec![
            Element::new("#ok", "button").at(10.0, 10.0, 80.0, 30.0).text("OK"),
            Element::new("#gone", "button").at(10.0, 60.0, 80.0, 30.0).style("display", "none"),
            Element::new("#flat", "div").at(10.0, 100.0, 0.0, 0.0),
            Element::new("#off", "button").at(10.0, 140.0, 80.0, 30.0).disabled(),
            Element::new("#under", "button").at(200.0, 10.0, 80.0, 30.0),
            Element::new("#overlay", "div").at(180.0, 0.0, 200.0, 100.0),
        ])
        .await;

        assert_eq!(clickability(page.as_ref(), "#ok").await.unwrap(), Clickability::Clickable);
        assert!(matches!(
            clickability(page.as_ref(), "#gone").await.unwrap(),
            Clickability::HiddenByStyle { .. }
        ));
        assert_eq!(clickability(page.as_ref(), "#flat").await.unwrap(), Clickability::ZeroSize);
        assert_eq!(clickability(page.as_ref(), "#off").await.unwrap(), Clickability::Disabled);
        assert_eq!(clickability(page.as_ref(), "#under").await.unwrap(), Clickability::Covered);
        assert!(clickability(page.as_ref(), "#nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_aria_disabled_counts_as_disabled() {
        let page = page_with(vec![Element::new("#link", "a")
            .at(0.0, 0.0, 50.0, 20.0)
            .attr("aria-disabled", "true")])
        .await;
        assert!(is_disabled(page.as_ref(), "#link").await.unwrap());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }
}
