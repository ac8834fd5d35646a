//! In-memory browser for deterministic runs
//!
//! A [`SimulatedBrowser`] serves a fixed site: each URL maps to a
//! [`SiteDocument`], a flat list of positioned [`Element`]s with styles,
//! attributes, text and interaction [`Effect`]s. Selectors match an
//! element's declared selector exactly; `body` always exists and its text
//! is the text of every rendered element.
//!
//! Element rectangles are in page coordinates. Later elements stack above
//! earlier ones, which is what hit tests and screenshots use.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::definition::Viewport;
use crate::driver::{
    BoundingBox, Browser, ConsoleLevel, LoadState, Page, PageEvent, Point, ScreenshotOptions,
    TimedEvent,
};
use crate::error::{Error, Result};

/// Side effect of an interaction or of loading a document
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Navigate(String),
    SetText { selector: String, text: String },
    Show(String),
    Hide(String),
    Enable(String),
    Disable(String),
    SetStyle { selector: String, property: String, value: String },
    Console { level: ConsoleLevel, text: String },
    PageError(String),
    /// A request with its outcome: a status, or a failure text when `status` is `None`
    Request { url: String, status: Option<u16>, failure: Option<String> },
    /// Make `evaluate(expression)` return `value` from now on
    SetExpression { expression: String, value: Value },
}

/// One element of a simulated document
#[derive(Debug, Clone)]
pub struct Element {
    pub selector: String,
    pub tag: String,
    pub rect: BoundingBox,
    pub styles: HashMap<String, String>,
    pub attributes: BTreeMap<String, String>,
    pub text: String,
    pub value: String,
    pub parent: Option<String>,
    pub disabled: bool,
    pub checked: bool,
    pub options: Vec<String>,
    pub on_click: Vec<Effect>,
    pub on_hover: Vec<Effect>,
    pub on_input: Vec<Effect>,
    pub on_drop: Vec<Effect>,
    pub on_key: Vec<(String, Effect)>,
}

impl Element {
    pub fn new(selector: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            tag: tag.into(),
            rect: BoundingBox::new(0.0, 0.0, 0.0, 0.0),
            styles: HashMap::new(),
            attributes: BTreeMap::new(),
            text: String::new(),
            value: String::new(),
            parent: None,
            disabled: false,
            checked: false,
            options: Vec::new(),
            on_click: Vec::new(),
            on_hover: Vec::new(),
            on_input: Vec::new(),
            on_drop: Vec::new(),
            on_key: Vec::new(),
        }
    }

    pub fn at(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = BoundingBox::new(x, y, width, height);
        self
    }

    pub fn style(mut self, property: &str, value: &str) -> Self {
        self.styles.insert(property.to_string(), value.to_string());
        self
    }

    pub fn attr(mut self, name: &str, value: &str) -> Self {
        self.attributes.insert(name.to_string(), value.to_string());
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn parent(mut self, selector: &str) -> Self {
        self.parent = Some(selector.to_string());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self.attributes.insert("disabled".to_string(), String::new());
        self
    }

    /// `hidden` attribute, which also implies `display: none`
    pub fn hidden(mut self) -> Self {
        self.attributes.insert("hidden".to_string(), String::new());
        self.styles.insert("display".to_string(), "none".to_string());
        self
    }

    pub fn options(mut self, options: &[&str]) -> Self {
        self.options = options.iter().map(|o| o.to_string()).collect();
        self
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.on_click.push(effect);
        self
    }

    pub fn on_hover(mut self, effect: Effect) -> Self {
        self.on_hover.push(effect);
        self
    }

    pub fn on_input(mut self, effect: Effect) -> Self {
        self.on_input.push(effect);
        self
    }

    pub fn on_drop(mut self, effect: Effect) -> Self {
        self.on_drop.push(effect);
        self
    }

    pub fn on_key(mut self, key: &str, effect: Effect) -> Self {
        self.on_key.push((key.to_string(), effect));
        self
    }

    fn style_of(&self, property: &str) -> String {
        if let Some(value) = self.styles.get(property) {
            return value.clone();
        }
        match property {
            "display" => match self.tag.as_str() {
                "span" | "a" | "img" | "label" => "inline".to_string(),
                "button" | "input" | "select" | "textarea" => "inline-block".to_string(),
                _ => "block".to_string(),
            },
            "visibility" => "visible".to_string(),
            "opacity" => "1".to_string(),
            "pointer-events" => "auto".to_string(),
            _ => String::new(),
        }
    }

    fn rendered(&self) -> bool {
        self.style_of("display") != "none"
    }

    fn paintable(&self) -> bool {
        self.rendered() && self.style_of("visibility") == "visible" && self.rect.has_area()
    }

    fn outer_html(&self) -> String {
        let mut html = format!("<{}", self.tag);
        if let Some(id) = self.selector.strip_prefix('#') {
            html.push_str(&format!(" id=\"{}\"", id));
        }
        for (name, value) in &self.attributes {
            if value.is_empty() {
                html.push_str(&format!(" {}", name));
            } else {
                html.push_str(&format!(" {}=\"{}\"", name, value));
            }
        }
        if !self.value.is_empty() {
            html.push_str(&format!(" value=\"{}\"", self.value));
        }
        html.push('>');
        html.push_str(&self.text);
        html.push_str(&format!("</{}>", self.tag));
        html
    }
}

/// A page served at one URL
#[derive(Debug, Clone)]
pub struct SiteDocument {
    pub title: String,
    pub elements: Vec<Element>,
    pub on_load: Vec<Effect>,
    pub expressions: HashMap<String, Value>,
    /// Never reaches network idle
    pub busy: bool,
}

impl SiteDocument {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            elements: Vec::new(),
            on_load: Vec::new(),
            expressions: HashMap::new(),
            busy: false,
        }
    }

    pub fn with(mut self, element: Element) -> Self {
        self.elements.push(element);
        self
    }

    pub fn on_load(mut self, effect: Effect) -> Self {
        self.on_load.push(effect);
        self
    }

    pub fn expression(mut self, expression: &str, value: Value) -> Self {
        self.expressions.insert(expression.to_string(), value);
        self
    }

    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    fn find(&self, selector: &str) -> Option<&Element> {
        self.elements.iter().find(|e| e.selector == selector)
    }

    fn find_mut(&mut self, selector: &str) -> Option<&mut Element> {
        self.elements.iter_mut().find(|e| e.selector == selector)
    }

    fn page_height(&self, viewport: Viewport) -> f64 {
        self.elements
            .iter()
            .filter(|e| e.rendered())
            .map(|e| e.rect.y + e.rect.height)
            .fold(viewport.height as f64, f64::max)
    }

    fn body_text(&self) -> String {
        self.elements
            .iter()
            .filter(|e| e.rendered() && !e.text.is_empty())
            .map(|e| e.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn is_descendant(&self, selector: &str, ancestor: &str) -> bool {
        let mut current = self.find(selector).and_then(|e| e.parent.clone());
        let mut hops = 0;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.elements.len() {
                return false;
            }
            current = self.find(&parent).and_then(|e| e.parent.clone());
        }
        false
    }

    /// Topmost element receiving pointer events at a page-space point
    fn top_at(&self, point: Point) -> Option<&Element> {
        self.elements.iter().rev().find(|e| {
            e.paintable() && e.style_of("pointer-events") != "none" && e.rect.contains(point)
        })
    }
}

struct SiteState {
    documents: RwLock<HashMap<String, SiteDocument>>,
    connected: AtomicBool,
    fail_new_page: AtomicBool,
    fail_close: AtomicBool,
    open_pages: AtomicUsize,
    next_page: AtomicU64,
    interactions: Mutex<Vec<String>>,
}

impl SiteState {
    fn record(&self, entry: String) {
        self.interactions.lock().push(entry);
    }
}

/// Deterministic in-memory [`Browser`]
#[derive(Clone)]
pub struct SimulatedBrowser {
    site: Arc<SiteState>,
}

impl Default for SimulatedBrowser {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBrowser {
    pub fn new() -> Self {
        Self {
            site: Arc::new(SiteState {
                documents: RwLock::new(HashMap::new()),
                connected: AtomicBool::new(true),
                fail_new_page: AtomicBool::new(false),
                fail_close: AtomicBool::new(false),
                open_pages: AtomicUsize::new(0),
                next_page: AtomicU64::new(1),
                interactions: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Serve `document` at `url`
    pub fn add_document(&self, url: impl Into<String>, document: SiteDocument) {
        self.site.documents.write().insert(url.into(), document);
    }

    /// Make the next `new_page` calls fail
    pub fn fail_new_page(&self, fail: bool) {
        self.site.fail_new_page.store(fail, Ordering::SeqCst);
    }

    /// Make `Page::close` report an error (the page still closes)
    pub fn fail_close(&self, fail: bool) {
        self.site.fail_close.store(fail, Ordering::SeqCst);
    }

    pub fn open_pages(&self) -> usize {
        self.site.open_pages.load(Ordering::SeqCst)
    }

    /// Every input the pages received, e.g. `click:#submit`
    pub fn interactions(&self) -> Vec<String> {
        self.site.interactions.lock().clone()
    }
}

#[async_trait]
impl Browser for SimulatedBrowser {
    async fn new_page(&self, viewport: Viewport) -> Result<Arc<dyn Page>> {
        if !self.is_connected() {
            return Err(Error::driver("browser is closed"));
        }
        if self.site.fail_new_page.load(Ordering::SeqCst) {
            return Err(Error::driver("simulated context creation failure"));
        }
        let n = self.site.next_page.fetch_add(1, Ordering::SeqCst);
        self.site.open_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(SimulatedPage {
            id: format!("sim-page-{}", n),
            site: self.site.clone(),
            state: Mutex::new(PageState {
                url: "about:blank".to_string(),
                doc: SiteDocument::new(""),
                viewport,
                scroll_y: 0.0,
                focused: None,
                mouse: Point { x: 0.0, y: 0.0 },
                pressed: None,
                next_request: 1,
            }),
            subscribers: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_connected(&self) -> bool {
        self.site.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.site.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

struct PageState {
    url: String,
    doc: SiteDocument,
    viewport: Viewport,
    scroll_y: f64,
    focused: Option<String>,
    mouse: Point,
    pressed: Option<String>,
    next_request: u64,
}

impl PageState {
    fn element(&self, selector: &str) -> Result<&Element> {
        self.doc.find(selector).ok_or_else(|| Error::not_found(selector))
    }

    fn element_mut(&mut self, selector: &str) -> Result<&mut Element> {
        self.doc.find_mut(selector).ok_or_else(|| Error::not_found(selector))
    }

    fn max_scroll(&self) -> f64 {
        (self.doc.page_height(self.viewport) - self.viewport.height as f64).max(0.0)
    }

    fn to_page(&self, point: Point) -> Point {
        Point {
            x: point.x,
            y: point.y + self.scroll_y,
        }
    }
}

pub struct SimulatedPage {
    id: String,
    site: Arc<SiteState>,
    state: Mutex<PageState>,
    subscribers: Mutex<Vec<UnboundedSender<TimedEvent>>>,
    closed: AtomicBool,
}

impl SimulatedPage {
    fn open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(Error::PageClosed(self.id.clone()))
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: PageEvent) {
        let event = TimedEvent::now(event);
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn read<R>(&self, f: impl FnOnce(&PageState) -> Result<R>) -> Result<R> {
        self.open()?;
        let state = self.state.lock();
        f(&state)
    }

    /// Mutate state, then apply the effects the closure returns
    fn interact(
        &self,
        record: String,
        f: impl FnOnce(&mut PageState) -> Result<Vec<Effect>>,
    ) -> Result<()> {
        self.open()?;
        let effects = {
            let mut state = self.state.lock();
            f(&mut state)?
        };
        self.site.record(record);
        for effect in effects {
            self.apply(effect)?;
        }
        Ok(())
    }

    fn load(&self, url: &str) -> Result<()> {
        let doc = self
            .site
            .documents
            .read()
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Navigation(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)))?;
        let on_load = doc.on_load.clone();
        let request_id = {
            let mut state = self.state.lock();
            state.url = url.to_string();
            state.doc = doc;
            state.scroll_y = 0.0;
            state.focused = None;
            state.next_request += 1;
            state.next_request
        };
        self.emit(PageEvent::Request {
            request_id: request_id.to_string(),
            url: url.to_string(),
            method: "GET".to_string(),
            resource_type: Some("document".to_string()),
        });
        self.emit(PageEvent::Response {
            request_id: request_id.to_string(),
            url: url.to_string(),
            status: 200,
        });
        for effect in on_load {
            self.apply(effect)?;
        }
        Ok(())
    }

    fn apply(&self, effect: Effect) -> Result<()> {
        match effect {
            Effect::Navigate(url) => self.load(&url),
            Effect::Console { level, text } => {
                self.emit(PageEvent::Console {
                    level,
                    text,
                    location: Some(self.state.lock().url.clone()),
                });
                Ok(())
            }
            Effect::PageError(message) => {
                self.emit(PageEvent::PageError { message });
                Ok(())
            }
            Effect::Request { url, status, failure } => {
                let request_id = {
                    let mut state = self.state.lock();
                    state.next_request += 1;
                    state.next_request.to_string()
                };
                self.emit(PageEvent::Request {
                    request_id: request_id.clone(),
                    url: url.clone(),
                    method: "GET".to_string(),
                    resource_type: Some("fetch".to_string()),
                });
                match (status, failure) {
                    (Some(status), _) => self.emit(PageEvent::Response { request_id, url, status }),
                    (None, Some(error)) => self.emit(PageEvent::RequestFailed { request_id, url, error }),
                    (None, None) => {}
                }
                Ok(())
            }
            Effect::SetExpression { expression, value } => {
                self.state.lock().doc.expressions.insert(expression, value);
                Ok(())
            }
            Effect::SetText { selector, text } => {
                self.state.lock().element_mut(&selector)?.text = text;
                Ok(())
            }
            Effect::Show(selector) => {
                let mut state = self.state.lock();
                let element = state.element_mut(&selector)?;
                element.attributes.remove("hidden");
                element.styles.insert("display".to_string(), "block".to_string());
                Ok(())
            }
            Effect::Hide(selector) => {
                self.state
                    .lock()
                    .element_mut(&selector)?
                    .styles
                    .insert("display".to_string(), "none".to_string());
                Ok(())
            }
            Effect::Enable(selector) => {
                let mut state = self.state.lock();
                let element = state.element_mut(&selector)?;
                element.disabled = false;
                element.attributes.remove("disabled");
                Ok(())
            }
            Effect::Disable(selector) => {
                let mut state = self.state.lock();
                let element = state.element_mut(&selector)?;
                element.disabled = true;
                element.attributes.insert("disabled".to_string(), String::new());
                Ok(())
            }
            Effect::SetStyle { selector, property, value } => {
                self.state.lock().element_mut(&selector)?.styles.insert(property, value);
                Ok(())
            }
        }
    }

    fn render(&self, state: &PageState, options: &ScreenshotOptions) -> Result<Vec<u8>> {
        let width = state.viewport.width;
        let (height, offset) = if options.full_page {
            (state.doc.page_height(state.viewport).ceil() as u32, 0.0)
        } else {
            (state.viewport.height, state.scroll_y)
        };

        let mut canvas = image::RgbaImage::from_pixel(width, height, image::Rgba([255, 255, 255, 255]));
        for element in state.doc.elements.iter().filter(|e| e.paintable()) {
            let color = element_color(element);
            let x0 = element.rect.x.max(0.0) as u32;
            let y0 = (element.rect.y - offset).max(0.0) as u32;
            let x1 = ((element.rect.x + element.rect.width).max(0.0) as u32).min(width);
            let y1 = ((element.rect.y + element.rect.height - offset).max(0.0) as u32).min(height);
            for y in y0..y1 {
                for x in x0..x1 {
                    canvas.put_pixel(x, y, color);
                }
            }
        }

        let shot = match options.clip {
            Some(clip) => {
                let x = clip.x.max(0.0) as u32;
                let y = clip.y.max(0.0) as u32;
                let w = (clip.width.ceil() as u32).min(width.saturating_sub(x));
                let h = (clip.height.ceil() as u32).min(height.saturating_sub(y));
                if w == 0 || h == 0 {
                    return Err(Error::driver("clip region is outside the captured area"));
                }
                image::imageops::crop_imm(&canvas, x, y, w, h).to_image()
            }
            None => canvas,
        };

        let mut bytes = Vec::new();
        shot.write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)?;
        Ok(bytes)
    }
}

/// Stable color from what an element shows
fn element_color(element: &Element) -> image::Rgba<u8> {
    // FNV-1a
    let mut hash: u32 = 0x811c_9dc5;
    let seed = format!(
        "{}|{}|{}|{}|{}",
        element.selector,
        element.text,
        element.value,
        element.checked,
        element.style_of("background-color")
    );
    for byte in seed.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(0x0100_0193);
    }
    let [r, g, b, _] = hash.to_le_bytes();
    image::Rgba([r, g, b.min(240), 255])
}

#[async_trait]
impl Page for SimulatedPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn goto(&self, url: &str, wait_until: LoadState, timeout: Duration) -> Result<()> {
        self.open()?;
        self.load(url)?;
        self.wait_for_load_state(wait_until, timeout).await
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        let busy = self.read(|s| Ok(s.doc.busy))?;
        if busy && state == LoadState::NetworkIdle {
            tokio::time::sleep(timeout).await;
            return Err(Error::timeout("network idle", timeout.as_millis() as u64));
        }
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        self.read(|s| Ok(s.url.clone()))
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.open()?;
        self.state.lock().viewport = viewport;
        Ok(())
    }

    async fn viewport(&self) -> Result<Viewport> {
        self.read(|s| Ok(s.viewport))
    }

    async fn content(&self) -> Result<String> {
        self.read(|s| {
            let mut html = format!(
                "<!DOCTYPE html><html><head><title>{}</title></head><body>",
                s.doc.title
            );
            for element in &s.doc.elements {
                html.push_str(&element.outer_html());
            }
            html.push_str("</body></html>");
            Ok(html)
        })
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.read(|s| Ok(s.doc.expressions.get(expression).cloned().unwrap_or(Value::Null)))
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        self.read(|s| {
            if selector == "body" {
                return Ok(1);
            }
            Ok(s.doc.elements.iter().filter(|e| e.selector == selector).count())
        })
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>> {
        self.read(|s| {
            if selector == "body" {
                return Ok(Some(BoundingBox::new(
                    0.0,
                    -s.scroll_y,
                    s.viewport.width as f64,
                    s.doc.page_height(s.viewport),
                )));
            }
            let element = s.element(selector)?;
            if !element.rendered() {
                return Ok(None);
            }
            let r = element.rect;
            Ok(Some(BoundingBox::new(r.x, r.y - s.scroll_y, r.width, r.height)))
        })
    }

    async fn computed_style(&self, selector: &str, property: &str) -> Result<String> {
        self.read(|s| {
            if selector == "body" {
                return Ok(Element::new("body", "body").style_of(property));
            }
            Ok(s.element(selector)?.style_of(property))
        })
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
        self.read(|s| {
            if selector == "body" {
                return Ok(None);
            }
            let element = s.element(selector)?;
            if name == "id" {
                return Ok(element.selector.strip_prefix('#').map(String::from));
            }
            Ok(element.attributes.get(name).cloned())
        })
    }

    async fn property(&self, selector: &str, name: &str) -> Result<Value> {
        self.read(|s| {
            let element = s.element(selector)?;
            Ok(match name {
                "disabled" => Value::Bool(element.disabled),
                "checked" => Value::Bool(element.checked),
                "value" => Value::String(element.value.clone()),
                _ => Value::Null,
            })
        })
    }

    async fn text(&self, selector: &str) -> Result<String> {
        self.read(|s| {
            if selector == "body" {
                return Ok(s.doc.body_text());
            }
            let element = s.element(selector)?;
            if element.rendered() {
                Ok(element.text.clone())
            } else {
                Ok(String::new())
            }
        })
    }

    async fn tag_name(&self, selector: &str) -> Result<String> {
        self.read(|s| {
            if selector == "body" {
                return Ok("body".to_string());
            }
            Ok(s.element(selector)?.tag.to_lowercase())
        })
    }

    async fn outer_html(&self, selector: &str) -> Result<String> {
        self.read(|s| Ok(s.element(selector)?.outer_html()))
    }

    async fn hit_test(&self, selector: &str, point: Point) -> Result<bool> {
        self.read(|s| {
            s.element(selector)?;
            let page_point = s.to_page(point);
            Ok(match s.doc.top_at(page_point) {
                Some(top) => top.selector == selector || s.doc.is_descendant(&top.selector, selector),
                None => false,
            })
        })
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.interact(format!("click:{}", selector), |s| {
            let element = s.element_mut(selector)?;
            if element.disabled {
                return Ok(Vec::new());
            }
            if element.tag == "input" && element.attributes.get("type").map(String::as_str) == Some("checkbox") {
                element.checked = !element.checked;
            }
            let effects = element.on_click.clone();
            s.focused = Some(selector.to_string());
            Ok(effects)
        })
    }

    async fn focus(&self, selector: &str) -> Result<()> {
        self.interact(format!("focus:{}", selector), |s| {
            s.element(selector)?;
            s.focused = Some(selector.to_string());
            Ok(Vec::new())
        })
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.interact(format!("fill:{}={}", selector, value), |s| {
            let element = s.element_mut(selector)?;
            if element.disabled {
                return Err(Error::driver(format!("{} is disabled", selector)));
            }
            element.value = value.to_string();
            let effects = element.on_input.clone();
            s.focused = Some(selector.to_string());
            Ok(effects)
        })
    }

    async fn insert_text(&self, selector: &str, text: &str) -> Result<()> {
        self.interact(format!("type:{}+{}", selector, text), |s| {
            let element = s.element_mut(selector)?;
            element.value.push_str(text);
            Ok(element.on_input.clone())
        })
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        self.interact(format!("hover:{}", selector), |s| {
            let element = s.element(selector)?;
            let center = element.rect.center();
            let effects = element.on_hover.clone();
            s.mouse = Point {
                x: center.x,
                y: center.y - s.scroll_y,
            };
            Ok(effects)
        })
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.interact(format!("scroll-into-view:{}", selector), |s| {
            let rect = s.element(selector)?.rect;
            let top = s.scroll_y;
            let bottom = top + s.viewport.height as f64;
            if rect.y < top || rect.y + rect.height > bottom {
                s.scroll_y = rect.y.min(s.max_scroll()).max(0.0);
            }
            Ok(Vec::new())
        })
    }

    async fn scroll_by(&self, _dx: f64, dy: f64) -> Result<()> {
        self.interact(format!("scroll-by:{}", dy), |s| {
            s.scroll_y = (s.scroll_y + dy).clamp(0.0, s.max_scroll());
            Ok(Vec::new())
        })
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.interact("scroll-to-bottom".to_string(), |s| {
            s.scroll_y = s.max_scroll();
            Ok(Vec::new())
        })
    }

    async fn mouse_move(&self, point: Point, _steps: u32) -> Result<()> {
        self.open()?;
        self.state.lock().mouse = point;
        Ok(())
    }

    async fn mouse_down(&self) -> Result<()> {
        self.open()?;
        let mut state = self.state.lock();
        let at = state.to_page(state.mouse);
        state.pressed = state.doc.top_at(at).map(|e| e.selector.clone());
        Ok(())
    }

    async fn mouse_up(&self) -> Result<()> {
        let (source, target) = {
            self.open()?;
            let mut state = self.state.lock();
            let at = state.to_page(state.mouse);
            let target = state.doc.top_at(at).map(|e| e.selector.clone());
            (state.pressed.take(), target)
        };
        match (source, target) {
            (Some(source), Some(target)) if source != target => {
                self.interact(format!("drag:{}->{}", source, target), |s| {
                    Ok(s.element(&target)?.on_drop.clone())
                })
            }
            _ => Ok(()),
        }
    }

    async fn key_down(&self, key: &str) -> Result<()> {
        self.interact(format!("key-down:{}", key), |_| Ok(Vec::new()))
    }

    async fn key_up(&self, key: &str) -> Result<()> {
        self.interact(format!("key-up:{}", key), |_| Ok(Vec::new()))
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.interact(format!("key:{}", key), |s| {
            let effects = match &s.focused {
                Some(focused) => s
                    .element(focused)?
                    .on_key
                    .iter()
                    .filter(|(k, _)| k == key)
                    .map(|(_, effect)| effect.clone())
                    .collect(),
                None => Vec::new(),
            };
            Ok(effects)
        })
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<Vec<String>> {
        self.interact(format!("select:{}={}", selector, value), |s| {
            let element = s.element_mut(selector)?;
            if !element.options.iter().any(|o| o == value) {
                return Err(Error::driver(format!("{} has no option {}", selector, value)));
            }
            element.value = value.to_string();
            Ok(element.on_input.clone())
        })?;
        Ok(vec![value.to_string()])
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<()> {
        self.interact(format!("checked:{}={}", selector, checked), |s| {
            let element = s.element_mut(selector)?;
            if element.disabled {
                return Err(Error::driver(format!("{} is disabled", selector)));
            }
            element.checked = checked;
            Ok(element.on_input.clone())
        })
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>> {
        self.open()?;
        let state = self.state.lock();
        self.render(&state, &options)
    }

    fn subscribe(&self) -> UnboundedReceiver<TimedEvent> {
        let (tx, rx) = unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.subscribers.lock().clear();
        self.site.open_pages.fetch_sub(1, Ordering::SeqCst);
        if self.site.fail_close.load(Ordering::SeqCst) {
            return Err(Error::driver(format!("simulated close failure for {}", self.id)));
        }
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn site() -> SimulatedBrowser {
        let browser = SimulatedBrowser::new();
        browser.add_document(
            "http://app.test/",
            SiteDocument::new("Home")
                .with(Element::new("#menu", "nav").at(0.0, 0.0, 400.0, 50.0))
                .with(Element::new("#item", "a").at(10.0, 10.0, 50.0, 20.0).parent("#menu").text("Item"))
                .with(Element::new("#footer", "footer").at(0.0, 1500.0, 400.0, 100.0).text("Footer"))
                .with(
                    Element::new("#go", "button")
                        .at(100.0, 100.0, 80.0, 30.0)
                        .on_click(Effect::Navigate("http://app.test/next".to_string())),
                ),
        );
        browser.add_document("http://app.test/next", SiteDocument::new("Next"));
        browser
    }

    #[tokio::test]
    async fn test_hit_test_accepts_descendants() {
        let browser = site();
        let page = browser.new_page(Viewport::default()).await.unwrap();
        page.goto("http://app.test/", LoadState::Load, Duration::from_secs(1)).await.unwrap();

        // #item is topmost here and is a descendant of #menu
        assert!(page.hit_test("#menu", Point { x: 20.0, y: 15.0 }).await.unwrap());
        assert!(page.hit_test("#item", Point { x: 20.0, y: 15.0 }).await.unwrap());
        assert!(!page.hit_test("#item", Point { x: 300.0, y: 15.0 }).await.unwrap());
    }

    #[tokio::test]
    async fn test_scroll_moves_viewport_boxes() {
        let browser = site();
        let page = browser.new_page(Viewport { width: 400, height: 600 }).await.unwrap();
        page.goto("http://app.test/", LoadState::Load, Duration::from_secs(1)).await.unwrap();

        page.scroll_into_view("#footer").await.unwrap();
        let rect = page.bounding_box("#footer").await.unwrap().unwrap();
        assert!(rect.within(Viewport { width: 400, height: 600 }));

        page.scroll_to_bottom().await.unwrap();
        let rect = page.bounding_box("#menu").await.unwrap().unwrap();
        assert_eq!(rect.y, -1000.0);
    }

    #[tokio::test]
    async fn test_click_effect_navigates_and_emits_events() {
        let browser = site();
        let page = browser.new_page(Viewport::default()).await.unwrap();
        let mut events = page.subscribe();
        page.goto("http://app.test/", LoadState::Load, Duration::from_secs(1)).await.unwrap();
        page.click("#go").await.unwrap();

        assert_eq!(page.url().await.unwrap(), "http://app.test/next");
        let mut responses = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event.event, PageEvent::Response { status: 200, .. }) {
                responses += 1;
            }
        }
        assert_eq!(responses, 2);
        assert_eq!(browser.interactions(), vec!["click:#go".to_string()]);
    }

    #[tokio::test]
    async fn test_screenshot_dimensions() {
        let browser = site();
        let page = browser.new_page(Viewport { width: 400, height: 600 }).await.unwrap();
        page.goto("http://app.test/", LoadState::Load, Duration::from_secs(1)).await.unwrap();

        let full = image::load_from_memory(&page.screenshot(ScreenshotOptions::full_page()).await.unwrap()).unwrap();
        assert_eq!((full.width(), full.height()), (400, 1600));

        let clip = page
            .screenshot(ScreenshotOptions::clip(BoundingBox::new(100.0, 100.0, 80.0, 30.0)))
            .await
            .unwrap();
        let clip = image::load_from_memory(&clip).unwrap();
        assert_eq!((clip.width(), clip.height()), (80, 30));
    }

    #[tokio::test]
    async fn test_closed_page_rejects_calls() {
        let browser = site();
        let page = browser.new_page(Viewport::default()).await.unwrap();
        assert_eq!(browser.open_pages(), 1);
        page.close().await.unwrap();
        assert_eq!(browser.open_pages(), 0);
        assert!(matches!(page.url().await, Err(Error::PageClosed(_))));
    }

    #[tokio::test]
    async fn test_unknown_url_fails_navigation() {
        let browser = site();
        let page = browser.new_page(Viewport::default()).await.unwrap();
        let err = page
            .goto("http://nowhere.test/", LoadState::Load, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Navigation(_)));
    }
}
