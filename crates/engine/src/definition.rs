//! Declarative test definitions
//!
//! A [`TestDefinition`] is the immutable input to a run: a URL, an ordered
//! list of actions and an ordered list of expectations. Actions, wait
//! conditions and expectations are tagged on `type`, so the fields each
//! variant needs are enforced when a definition is deserialized and an
//! unknown `type` is rejected up front.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};

/// A complete test definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Unique id for this test
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// URL the run navigates to before the first action
    pub url: String,

    /// Viewport for the page (engine default when absent)
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Actions to execute in order
    #[serde(default)]
    pub actions: Vec<UiAction>,

    /// Post-conditions checked once after all actions ran
    #[serde(default)]
    pub expectations: Vec<UiExpectation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: 1280,
            height: 720,
        }
    }
}

fn default_action_timeout() -> u64 {
    5000
}

fn default_wait_timeout() -> u64 {
    10_000
}

fn default_critical() -> bool {
    true
}

/// One user action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiAction {
    pub id: String,

    #[serde(flatten)]
    pub kind: ActionKind,

    /// Budget for the action itself, excluding its wait conditions
    #[serde(default = "default_action_timeout")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub wait_for: Option<WaitCondition>,

    #[serde(default)]
    pub wait_after: Option<WaitCondition>,

    #[serde(default)]
    pub screenshot_before: bool,

    #[serde(default)]
    pub screenshot_after: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionKind {
    Click {
        selector: String,
    },

    /// Clear, then enter characters; one at a time when `delay_ms` is set
    Type {
        selector: String,
        value: String,
        #[serde(default)]
        delay_ms: Option<u64>,
    },

    /// Clear-and-set without per-character events
    Fill {
        selector: String,
        value: String,
    },

    /// `selector` is an element, a pixel delta like `"400"` or `"bottom"`
    Scroll {
        selector: String,
    },

    Hover {
        selector: String,
    },

    Drag {
        selector: String,
        target_selector: String,
    },

    Keyboard {
        #[serde(default)]
        selector: Option<String>,
        key: String,
        #[serde(default)]
        delay_ms: Option<u64>,
    },

    Press {
        #[serde(default)]
        selector: Option<String>,
        key: String,
        #[serde(default)]
        delay_ms: Option<u64>,
    },

    Select {
        selector: String,
        value: String,
    },

    Check {
        selector: String,
    },

    Uncheck {
        selector: String,
    },
}

impl ActionKind {
    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::Click { .. } => "click",
            ActionKind::Type { .. } => "type",
            ActionKind::Fill { .. } => "fill",
            ActionKind::Scroll { .. } => "scroll",
            ActionKind::Hover { .. } => "hover",
            ActionKind::Drag { .. } => "drag",
            ActionKind::Keyboard { .. } => "keyboard",
            ActionKind::Press { .. } => "press",
            ActionKind::Select { .. } => "select",
            ActionKind::Check { .. } => "check",
            ActionKind::Uncheck { .. } => "uncheck",
        }
    }

    /// Primary selector the action targets, if any
    pub fn selector(&self) -> Option<&str> {
        match self {
            ActionKind::Click { selector }
            | ActionKind::Type { selector, .. }
            | ActionKind::Fill { selector, .. }
            | ActionKind::Scroll { selector }
            | ActionKind::Hover { selector }
            | ActionKind::Drag { selector, .. }
            | ActionKind::Select { selector, .. }
            | ActionKind::Check { selector }
            | ActionKind::Uncheck { selector } => Some(selector),
            ActionKind::Keyboard { selector, .. } | ActionKind::Press { selector, .. } => {
                selector.as_deref()
            }
        }
    }
}

impl UiAction {
    pub fn new(id: impl Into<String>, kind: ActionKind) -> Self {
        Self {
            id: id.into(),
            kind,
            timeout_ms: default_action_timeout(),
            wait_for: None,
            wait_after: None,
            screenshot_before: false,
            screenshot_after: false,
        }
    }

    pub fn click(id: impl Into<String>, selector: impl Into<String>) -> Self {
        Self::new(id, ActionKind::Click { selector: selector.into() })
    }

    pub fn fill(id: impl Into<String>, selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(
            id,
            ActionKind::Fill {
                selector: selector.into(),
                value: value.into(),
            },
        )
    }

    pub fn type_text(
        id: impl Into<String>,
        selector: impl Into<String>,
        value: impl Into<String>,
        delay_ms: Option<u64>,
    ) -> Self {
        Self::new(
            id,
            ActionKind::Type {
                selector: selector.into(),
                value: value.into(),
                delay_ms,
            },
        )
    }

    pub fn hover(id: impl Into<String>, selector: impl Into<String>) -> Self {
        Self::new(id, ActionKind::Hover { selector: selector.into() })
    }

    pub fn press(id: impl Into<String>, selector: Option<&str>, key: impl Into<String>) -> Self {
        Self::new(
            id,
            ActionKind::Press {
                selector: selector.map(String::from),
                key: key.into(),
                delay_ms: None,
            },
        )
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_wait_for(mut self, condition: WaitCondition) -> Self {
        self.wait_for = Some(condition);
        self
    }

    pub fn with_wait_after(mut self, condition: WaitCondition) -> Self {
        self.wait_after = Some(condition);
        self
    }

    pub fn with_screenshots(mut self, before: bool, after: bool) -> Self {
        self.screenshot_before = before;
        self.screenshot_after = after;
        self
    }

    /// Short label used in logs, e.g. `click:#submit`
    pub fn label(&self) -> String {
        match self.kind.selector() {
            Some(selector) => format!("{}:{}", self.kind.name(), selector),
            None => self.kind.name().to_string(),
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidAction {
            action_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("action id is empty"));
        }
        if let Some(selector) = self.kind.selector() {
            if selector.trim().is_empty() {
                return Err(invalid("selector is empty"));
            }
        }
        match &self.kind {
            ActionKind::Drag { target_selector, .. } if target_selector.trim().is_empty() => {
                Err(invalid("drag requires target_selector"))
            }
            ActionKind::Keyboard { key, .. } | ActionKind::Press { key, .. } if key.is_empty() => {
                Err(invalid("key is empty"))
            }
            _ => Ok(()),
        }?;
        for condition in [&self.wait_for, &self.wait_after].into_iter().flatten() {
            condition.validate().map_err(|e| invalid(&e.to_string()))?;
        }
        Ok(())
    }
}

/// A blocking pre- or post-condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WaitCondition {
    Element {
        selector: String,
        #[serde(default)]
        state: ElementWaitState,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    Url {
        url_pattern: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    #[serde(rename = "networkidle")]
    NetworkIdle {
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    Load {
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },

    /// JavaScript expression polled until truthy
    Function {
        expression: String,
        #[serde(default = "default_wait_timeout")]
        timeout_ms: u64,
    },
}

impl WaitCondition {
    pub fn element(selector: impl Into<String>) -> Self {
        WaitCondition::Element {
            selector: selector.into(),
            state: ElementWaitState::Visible,
            timeout_ms: default_wait_timeout(),
        }
    }

    pub fn url(url_pattern: impl Into<String>) -> Self {
        WaitCondition::Url {
            url_pattern: url_pattern.into(),
            timeout_ms: default_wait_timeout(),
        }
    }

    pub fn timeout_ms(&self) -> u64 {
        match self {
            WaitCondition::Element { timeout_ms, .. }
            | WaitCondition::Url { timeout_ms, .. }
            | WaitCondition::NetworkIdle { timeout_ms }
            | WaitCondition::Load { timeout_ms }
            | WaitCondition::Function { timeout_ms, .. } => *timeout_ms,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            WaitCondition::Element { selector, state, .. } => {
                format!("element {} to be {}", selector, state)
            }
            WaitCondition::Url { url_pattern, .. } => format!("url matching {}", url_pattern),
            WaitCondition::NetworkIdle { .. } => "network idle".to_string(),
            WaitCondition::Load { .. } => "page load".to_string(),
            WaitCondition::Function { expression, .. } => format!("predicate `{}`", expression),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            WaitCondition::Element { selector, .. } if selector.trim().is_empty() => Err(
                Error::InvalidDefinition("element wait requires a selector".to_string()),
            ),
            WaitCondition::Url { url_pattern, .. } if url_pattern.is_empty() => Err(
                Error::InvalidDefinition("url wait requires url_pattern".to_string()),
            ),
            WaitCondition::Function { expression, .. } if expression.trim().is_empty() => Err(
                Error::InvalidDefinition("function wait requires an expression".to_string()),
            ),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementWaitState {
    #[default]
    Visible,
    Hidden,
    Attached,
    Detached,
}

impl std::fmt::Display for ElementWaitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ElementWaitState::Visible => write!(f, "visible"),
            ElementWaitState::Hidden => write!(f, "hidden"),
            ElementWaitState::Attached => write!(f, "attached"),
            ElementWaitState::Detached => write!(f, "detached"),
        }
    }
}

/// A declarative post-condition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiExpectation {
    pub id: String,

    /// Critical expectations fail the run; others only flip `partial_pass`
    #[serde(default = "default_critical")]
    pub critical: bool,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(flatten)]
    pub kind: ExpectationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectationKind {
    ElementVisible {
        selector: String,
    },

    ElementEnabled {
        selector: String,
    },

    /// Checks `body` when no selector is given
    TextPresent {
        #[serde(default)]
        selector: Option<String>,
        expected_value: String,
        #[serde(default = "default_text_mode")]
        mode: TextMatchMode,
    },

    CssProperty {
        selector: String,
        property: String,
        expected_value: String,
    },

    ConsoleNoErrors,

    NetworkSuccess,

    UrlContains {
        expected_value: String,
    },
}

fn default_text_mode() -> TextMatchMode {
    TextMatchMode::Contains
}

impl ExpectationKind {
    pub fn name(&self) -> &'static str {
        match self {
            ExpectationKind::ElementVisible { .. } => "element_visible",
            ExpectationKind::ElementEnabled { .. } => "element_enabled",
            ExpectationKind::TextPresent { .. } => "text_present",
            ExpectationKind::CssProperty { .. } => "css_property",
            ExpectationKind::ConsoleNoErrors => "console_no_errors",
            ExpectationKind::NetworkSuccess => "network_success",
            ExpectationKind::UrlContains { .. } => "url_contains",
        }
    }

    pub fn selector(&self) -> Option<&str> {
        match self {
            ExpectationKind::ElementVisible { selector }
            | ExpectationKind::ElementEnabled { selector }
            | ExpectationKind::CssProperty { selector, .. } => Some(selector),
            ExpectationKind::TextPresent { selector, .. } => selector.as_deref(),
            _ => None,
        }
    }
}

impl UiExpectation {
    pub fn new(id: impl Into<String>, kind: ExpectationKind) -> Self {
        Self {
            id: id.into(),
            critical: true,
            description: None,
            kind,
        }
    }

    pub fn element_visible(id: impl Into<String>, selector: impl Into<String>) -> Self {
        Self::new(id, ExpectationKind::ElementVisible { selector: selector.into() })
    }

    pub fn element_enabled(id: impl Into<String>, selector: impl Into<String>) -> Self {
        Self::new(id, ExpectationKind::ElementEnabled { selector: selector.into() })
    }

    pub fn text_present(id: impl Into<String>, selector: Option<&str>, text: impl Into<String>) -> Self {
        Self::new(
            id,
            ExpectationKind::TextPresent {
                selector: selector.map(String::from),
                expected_value: text.into(),
                mode: TextMatchMode::Contains,
            },
        )
    }

    pub fn url_contains(id: impl Into<String>, fragment: impl Into<String>) -> Self {
        Self::new(id, ExpectationKind::UrlContains { expected_value: fragment.into() })
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The description, or a generated one when none was given
    pub fn describe(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        match &self.kind {
            ExpectationKind::ElementVisible { selector } => format!("{} is visible", selector),
            ExpectationKind::ElementEnabled { selector } => format!("{} is enabled", selector),
            ExpectationKind::TextPresent { selector, expected_value, mode } => format!(
                "{} text {} \"{}\"",
                selector.as_deref().unwrap_or("body"),
                mode.verb(),
                expected_value
            ),
            ExpectationKind::CssProperty { selector, property, expected_value } => {
                format!("{} has {}: {}", selector, property, expected_value)
            }
            ExpectationKind::ConsoleNoErrors => "console has no errors".to_string(),
            ExpectationKind::NetworkSuccess => "all network requests succeed".to_string(),
            ExpectationKind::UrlContains { expected_value } => {
                format!("url contains \"{}\"", expected_value)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Error::InvalidExpectation {
            expectation_id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("expectation id is empty"));
        }
        if let Some(selector) = self.kind.selector() {
            if selector.trim().is_empty() {
                return Err(invalid("selector is empty"));
            }
        }
        match &self.kind {
            ExpectationKind::CssProperty { property, .. } if property.trim().is_empty() => {
                Err(invalid("css_property requires property"))
            }
            ExpectationKind::TextPresent { expected_value, mode: TextMatchMode::Regex, .. } => {
                regex::Regex::new(expected_value)
                    .map(|_| ())
                    .map_err(|e| invalid(&format!("bad regex: {}", e)))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextMatchMode {
    Exact,
    Contains,
    Regex,
}

impl TextMatchMode {
    fn verb(&self) -> &'static str {
        match self {
            TextMatchMode::Exact => "equals",
            TextMatchMode::Contains => "contains",
            TextMatchMode::Regex => "matches",
        }
    }
}

impl TestDefinition {
    pub fn new(id: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: url.into(),
            viewport: None,
            actions: Vec::new(),
            expectations: Vec::new(),
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = Some(Viewport { width, height });
        self
    }

    pub fn action(mut self, action: UiAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn expect(mut self, expectation: UiExpectation) -> Self {
        self.expectations.push(expectation);
        self
    }

    /// Parse a definition from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let def: Self = serde_yaml::from_str(yaml)?;
        def.validate()?;
        Ok(def)
    }

    /// Parse a definition from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let def: Self = serde_json::from_str(json)?;
        def.validate()?;
        Ok(def)
    }

    /// Parse a definition file, choosing the format by extension
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Load all definitions from a directory, sorted by path
    pub fn load_all(dir: &Path) -> Result<Vec<Self>> {
        let mut paths: Vec<_> = walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml" || ext == "json")
                    .unwrap_or(false)
            })
            .map(|e| e.into_path())
            .collect();
        paths.sort();

        paths.iter().map(|p| Self::from_file(p)).collect()
    }

    /// Check the invariants serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidDefinition("test id is empty".to_string()));
        }
        if self.url.trim().is_empty() {
            return Err(Error::InvalidDefinition(format!("test {} has no url", self.id)));
        }
        if let Some(viewport) = self.viewport {
            if viewport.width == 0 || viewport.height == 0 {
                return Err(Error::InvalidDefinition(format!(
                    "test {} has a zero-sized viewport",
                    self.id
                )));
            }
        }

        let mut seen = HashSet::new();
        for action in &self.actions {
            action.validate()?;
            if !seen.insert(action.id.as_str()) {
                return Err(Error::InvalidDefinition(format!("duplicate action id: {}", action.id)));
            }
        }

        let mut seen = HashSet::new();
        for expectation in &self.expectations {
            expectation.validate()?;
            if !seen.insert(expectation.id.as_str()) {
                return Err(Error::InvalidDefinition(format!(
                    "duplicate expectation id: {}",
                    expectation.id
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_login_definition() {
        let yaml = r##"
id: login-flow
name: Login happy path
url: http://app.test/login
viewport:
  width: 1024
  height: 768
actions:
  - id: email
    type: fill
    selector: '#email'
    value: user@test.com
  - id: submit
    type: click
    selector: '#submit'
    screenshot_after: true
    wait_after:
      type: url
      url_pattern: '**/dashboard'
expectations:
  - id: on-dashboard
    type: url_contains
    expected_value: /dashboard
"##;
        let def = TestDefinition::from_yaml(yaml).unwrap();
        assert_eq!(def.id, "login-flow");
        assert_eq!(def.actions.len(), 2);
        assert_eq!(def.actions[1].kind, ActionKind::Click { selector: "#submit".to_string() });
        assert!(def.actions[1].screenshot_after);
        assert_eq!(def.actions[0].timeout_ms, 5000);
        assert!(def.expectations[0].critical);
        assert_eq!(def.viewport, Some(Viewport { width: 1024, height: 768 }));
    }

    #[test]
    fn test_drag_without_target_is_rejected() {
        let yaml = r##"
id: drag
name: drag
url: http://app.test/
actions:
  - id: d1
    type: drag
    selector: '#card'
"##;
        assert!(matches!(TestDefinition::from_yaml(yaml), Err(Error::Yaml(_))));
    }

    #[test]
    fn test_fill_without_value_is_rejected() {
        let json = r##"{"id":"t","name":"t","url":"http://x/","actions":[{"id":"a","type":"fill","selector":"#q"}]}"##;
        assert!(matches!(TestDefinition::from_json(json), Err(Error::Json(_))));
    }

    #[test]
    fn test_unknown_expectation_type_is_rejected() {
        let yaml = r##"
id: t
name: t
url: http://app.test/
expectations:
  - id: e1
    type: pixel_perfect
"##;
        assert!(TestDefinition::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_duplicate_action_ids_are_rejected() {
        let def = TestDefinition::new("t", "t", "http://app.test/")
            .action(UiAction::click("a", "#one"))
            .action(UiAction::click("a", "#two"));
        assert!(matches!(def.validate(), Err(Error::InvalidDefinition(_))));
    }

    #[test]
    fn test_bad_regex_expectation_is_rejected() {
        let def = TestDefinition::new("t", "t", "http://app.test/").expect(UiExpectation::new(
            "e",
            ExpectationKind::TextPresent {
                selector: None,
                expected_value: "([".to_string(),
                mode: TextMatchMode::Regex,
            },
        ));
        assert!(matches!(def.validate(), Err(Error::InvalidExpectation { .. })));
    }

    #[test]
    fn test_wait_condition_tags() {
        let yaml = "type: networkidle\ntimeout_ms: 2000\n";
        let condition: WaitCondition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(condition, WaitCondition::NetworkIdle { timeout_ms: 2000 });

        let yaml = "type: element\nselector: '#spinner'\nstate: hidden\n";
        let condition: WaitCondition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(condition.timeout_ms(), 10_000);
        assert_eq!(condition.describe(), "element #spinner to be hidden");
    }

    #[test]
    fn test_describe_defaults() {
        let e = UiExpectation::url_contains("u", "/dashboard");
        assert_eq!(e.describe(), "url contains \"/dashboard\"");
        let e = e.with_description("lands on dashboard");
        assert_eq!(e.describe(), "lands on dashboard");
    }

    #[test]
    fn test_load_all_reads_yaml_and_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("a.yaml"),
            "id: a\nname: a\nurl: http://app.test/\n",
        )
        .unwrap();
        std::fs::write(
            tmp.path().join("b.json"),
            r#"{"id":"b","name":"b","url":"http://app.test/"}"#,
        )
        .unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let defs = TestDefinition::load_all(tmp.path()).unwrap();
        let ids: Vec<_> = defs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
