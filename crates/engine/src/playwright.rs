//! Playwright browser automation
//!
//! A single long-lived node process hosts Playwright and speaks
//! line-delimited JSON on stdin/stdout:
//!
//! ```text
//! -> {"id": 7, "method": "click", "params": {"page": "pw-page-1", "selector": "#go"}}
//! <- {"id": 7, "result": null}
//! <- {"id": 8, "error": {"code": "not_found", "message": "...", "selector": "#go"}}
//! <- {"event": "response", "page": "pw-page-1", "request_id": "3", "url": "...", "status": 200}
//! ```
//!
//! Every page gets its own browser context. Screenshots travel base64.

use async_trait::async_trait;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::definition::Viewport;
use crate::driver::{
    BoundingBox, Browser, ConsoleLevel, LoadState, Page, PageEvent, Point, ScreenshotOptions,
    TimedEvent,
};
use crate::error::{Error, Result};

const BRIDGE_SCRIPT: &str = r##"
const readline = require('readline');
const pw = require('playwright');

let browser = null;
const pages = new Map();
let nextPage = 1;

const send = (msg) => process.stdout.write(JSON.stringify(msg) + '\n');

function fail(code, message, selector) {
  const e = new Error(message);
  e.code = code;
  e.selector = selector || null;
  return e;
}

function pageOf(p) {
  const entry = pages.get(p.page);
  if (!entry) throw fail('page_closed', String(p.page));
  return entry.page;
}

async function el(p) {
  const handle = await pageOf(p).$(p.selector);
  if (!handle) throw fail('not_found', 'Element not found: ' + p.selector, p.selector);
  return handle;
}

function timeouts(e) {
  if (e && e.name === 'TimeoutError') return fail('timeout', e.message);
  return e;
}

function attach(id, page) {
  const ids = new WeakMap();
  let nextRequest = 1;
  const rid = (req) => {
    if (!ids.has(req)) ids.set(req, String(nextRequest++));
    return ids.get(req);
  };
  page.on('console', (m) => send({ event: 'console', page: id, ts: Date.now(), kind: m.type(), text: m.text(), location: m.location().url || null }));
  page.on('pageerror', (e) => send({ event: 'page_error', page: id, ts: Date.now(), message: String((e && e.message) || e) }));
  page.on('request', (r) => send({ event: 'request', page: id, ts: Date.now(), request_id: rid(r), url: r.url(), method: r.method(), resource_type: r.resourceType() }));
  page.on('response', (r) => send({ event: 'response', page: id, ts: Date.now(), request_id: rid(r.request()), url: r.url(), status: r.status() }));
  page.on('requestfailed', (r) => send({ event: 'request_failed', page: id, ts: Date.now(), request_id: rid(r), url: r.url(), error: (r.failure() || {}).errorText || 'failed' }));
}

const methods = {
  async launch(p) { browser = await pw[p.browser].launch({ headless: p.headless }); return null; },
  async close() { if (browser) await browser.close(); browser = null; return null; },
  async newPage(p) {
    const context = await browser.newContext({ viewport: p.viewport });
    const page = await context.newPage();
    const id = 'pw-page-' + nextPage++;
    pages.set(id, { context, page });
    attach(id, page);
    return id;
  },
  async closePage(p) {
    const entry = pages.get(p.page);
    if (entry) { pages.delete(p.page); await entry.context.close(); }
    return null;
  },
  async goto(p) {
    try { await pageOf(p).goto(p.url, { waitUntil: p.waitUntil, timeout: p.timeout }); }
    catch (e) { if (e && e.name === 'TimeoutError') throw timeouts(e); throw fail('navigation', e.message); }
    return null;
  },
  async waitForLoadState(p) {
    try { await pageOf(p).waitForLoadState(p.state, { timeout: p.timeout }); } catch (e) { throw timeouts(e); }
    return null;
  },
  async url(p) { return pageOf(p).url(); },
  async setViewport(p) { await pageOf(p).setViewportSize({ width: p.width, height: p.height }); return null; },
  async content(p) { return await pageOf(p).content(); },
  async evaluate(p) { const v = await pageOf(p).evaluate(p.expression); return v === undefined ? null : v; },
  async count(p) { return (await pageOf(p).$$(p.selector)).length; },
  async boundingBox(p) { return await (await el(p)).boundingBox(); },
  async computedStyle(p) { return await (await el(p)).evaluate((e, prop) => getComputedStyle(e).getPropertyValue(prop), p.property); },
  async attribute(p) { return await (await el(p)).getAttribute(p.name); },
  async property(p) { const v = await (await el(p)).evaluate((e, name) => e[name], p.name); return v === undefined ? null : v; },
  async text(p) { return await (await el(p)).innerText(); },
  async tagName(p) { return await (await el(p)).evaluate((e) => e.tagName.toLowerCase()); },
  async outerHtml(p) { return await (await el(p)).evaluate((e) => e.outerHTML); },
  async hitTest(p) {
    return await (await el(p)).evaluate((e, pt) => {
      const hit = document.elementFromPoint(pt.x, pt.y);
      return !!hit && (hit === e || e.contains(hit));
    }, { x: p.x, y: p.y });
  },
  async click(p) { await (await el(p)).click(); return null; },
  async focus(p) { await (await el(p)).focus(); return null; },
  async fill(p) { await (await el(p)).fill(p.value); return null; },
  async insertText(p) { await (await el(p)).type(p.text); return null; },
  async hover(p) { await (await el(p)).hover(); return null; },
  async scrollIntoView(p) { await (await el(p)).scrollIntoViewIfNeeded(); return null; },
  async scrollBy(p) { await pageOf(p).evaluate((d) => window.scrollBy(d.dx, d.dy), { dx: p.dx, dy: p.dy }); return null; },
  async scrollToBottom(p) { await pageOf(p).evaluate(() => window.scrollTo(0, document.documentElement.scrollHeight)); return null; },
  async mouseMove(p) { await pageOf(p).mouse.move(p.x, p.y, { steps: p.steps }); return null; },
  async mouseDown(p) { await pageOf(p).mouse.down(); return null; },
  async mouseUp(p) { await pageOf(p).mouse.up(); return null; },
  async keyDown(p) { await pageOf(p).keyboard.down(p.key); return null; },
  async keyUp(p) { await pageOf(p).keyboard.up(p.key); return null; },
  async press(p) { await pageOf(p).keyboard.press(p.key); return null; },
  async selectOption(p) { return await (await el(p)).selectOption(p.value); },
  async setChecked(p) { await (await el(p)).setChecked(p.checked); return null; },
  async screenshot(p) {
    const buf = await pageOf(p).screenshot({ fullPage: p.fullPage, clip: p.clip || undefined });
    return buf.toString('base64');
  },
};

readline.createInterface({ input: process.stdin }).on('line', async (line) => {
  let msg;
  try { msg = JSON.parse(line); } catch (e) { return; }
  const handler = methods[msg.method];
  if (!handler) {
    send({ id: msg.id, error: { code: 'protocol', message: 'unknown method ' + msg.method } });
    return;
  }
  try {
    const result = await handler(msg.params || {});
    send({ id: msg.id, result: result === undefined ? null : result });
  } catch (e) {
    send({ id: msg.id, error: { code: (e && e.code) || 'driver', message: String((e && e.message) || e), selector: (e && e.selector) || null } });
  }
}).on('close', async () => {
  if (browser) await browser.close();
  process.exit(0);
});
"##;

/// Routes bridge output to waiting calls and page subscribers
#[derive(Default)]
struct Router {
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    subscribers: Mutex<HashMap<String, Vec<UnboundedSender<TimedEvent>>>>,
    exited: AtomicBool,
}

impl Router {
    fn route(&self, line: &str) {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(_) => {
                debug!("bridge: {}", line);
                return;
            }
        };

        if let Some(id) = value.get("id").and_then(Value::as_u64) {
            let reply = match value.get("error") {
                Some(error) if !error.is_null() => Err(bridge_error(error)),
                _ => Ok(value.get("result").cloned().unwrap_or(Value::Null)),
            };
            if let Some(tx) = self.pending.lock().remove(&id) {
                let _ = tx.send(reply);
            }
            return;
        }

        let Some(page) = value.get("page").and_then(Value::as_str) else {
            debug!("bridge: unrouted message {}", line);
            return;
        };
        match parse_event(&value) {
            Some(event) => {
                if let Some(subscribers) = self.subscribers.lock().get_mut(page) {
                    subscribers.retain(|tx| tx.send(event.clone()).is_ok());
                }
            }
            None => debug!("bridge: unknown event {}", line),
        }
    }

    /// Fail every outstanding call once the process is gone
    fn shut_down(&self, reason: &str) {
        self.exited.store(true, Ordering::SeqCst);
        for (_, tx) in self.pending.lock().drain() {
            let _ = tx.send(Err(Error::Protocol(reason.to_string())));
        }
        self.subscribers.lock().clear();
    }
}

/// Event with the bridge's emission time, falling back to arrival time
fn parse_event(value: &Value) -> Option<TimedEvent> {
    let at = value
        .get("ts")
        .and_then(Value::as_i64)
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);
    page_event(value).map(|event| TimedEvent { at, event })
}

fn page_event(value: &Value) -> Option<PageEvent> {
    if value.get("event").and_then(Value::as_str) == Some("console") {
        let str_field = |name: &str| value.get(name).and_then(Value::as_str).map(String::from);
        return Some(PageEvent::Console {
            level: ConsoleLevel::parse(value.get("kind").and_then(Value::as_str).unwrap_or("log")),
            text: str_field("text").unwrap_or_default(),
            location: str_field("location"),
        });
    }
    serde_json::from_value(value.clone()).ok()
}

fn bridge_error(error: &Value) -> Error {
    let code = error.get("code").and_then(Value::as_str).unwrap_or("driver");
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown bridge error")
        .to_string();
    match code {
        "not_found" => Error::not_found(
            error
                .get("selector")
                .and_then(Value::as_str)
                .unwrap_or_default(),
        ),
        "timeout" => Error::timeout(message, 0),
        "navigation" => Error::Navigation(message),
        "page_closed" => Error::PageClosed(message),
        "protocol" => Error::Protocol(message),
        _ => Error::Driver(message),
    }
}

struct Bridge {
    router: Arc<Router>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: tokio::sync::Mutex<Child>,
    next_id: AtomicU64,
    call_timeout: Duration,
}

impl Bridge {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        self.call_with_timeout(method, params, self.call_timeout).await
    }

    async fn call_with_timeout(&self, method: &str, params: Value, limit: Duration) -> Result<Value> {
        if self.router.exited.load(Ordering::SeqCst) {
            return Err(Error::Protocol("bridge process has exited".to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.router.pending.lock().insert(id, tx);

        let mut line = serde_json::to_vec(&json!({ "id": id, "method": method, "params": params }))?;
        line.push(b'\n');
        {
            let mut stdin = self.stdin.lock().await;
            let written = async {
                stdin.write_all(&line).await?;
                stdin.flush().await
            }
            .await;
            if let Err(e) = written {
                self.router.pending.lock().remove(&id);
                return Err(e.into());
            }
        }

        match tokio::time::timeout(limit, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::Protocol(format!("no reply to {}", method))),
            Err(_) => {
                self.router.pending.lock().remove(&id);
                Err(Error::timeout(format!("bridge call {}", method), limit.as_millis() as u64))
            }
        }
    }
}

async fn read_loop(router: Arc<Router>, stdout: ChildStdout) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => router.route(&line),
            Ok(None) => break,
            Err(e) => {
                warn!("Bridge read error: {}", e);
                break;
            }
        }
    }
    router.shut_down("bridge process exited");
}

/// Browser driven through Playwright
pub struct PlaywrightBrowser {
    bridge: Arc<Bridge>,
    connected: AtomicBool,
}

impl PlaywrightBrowser {
    /// Start the bridge and launch the configured browser
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        Self::check_playwright_installed(config)?;

        let mut command = TokioCommand::new(&config.node_binary);
        command
            .args(["-e", BRIDGE_SCRIPT])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::driver("bridge stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::driver("bridge stdout unavailable"))?;

        let router = Arc::new(Router::default());
        tokio::spawn(read_loop(router.clone(), stdout));

        let bridge = Arc::new(Bridge {
            router,
            stdin: tokio::sync::Mutex::new(stdin),
            child: tokio::sync::Mutex::new(child),
            next_id: AtomicU64::new(1),
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        });

        bridge
            .call_with_timeout(
                "launch",
                json!({ "browser": config.kind.as_str(), "headless": config.headless }),
                Duration::from_millis(config.launch_timeout_ms),
            )
            .await?;
        info!("Launched {} (headless: {})", config.kind.as_str(), config.headless);

        Ok(Self {
            bridge,
            connected: AtomicBool::new(true),
        })
    }

    /// Check that node can load Playwright from the working directory
    fn check_playwright_installed(config: &BrowserConfig) -> Result<()> {
        let mut command = Command::new(&config.node_binary);
        command
            .args(["-e", "require.resolve('playwright')"])
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }

        match command.status() {
            Ok(status) if status.success() => Ok(()),
            _ => Err(Error::DriverNotFound),
        }
    }
}

#[async_trait]
impl Browser for PlaywrightBrowser {
    async fn new_page(&self, viewport: Viewport) -> Result<Arc<dyn Page>> {
        if !self.is_connected() {
            return Err(Error::driver("browser is closed"));
        }
        let id = self
            .bridge
            .call("newPage", json!({ "viewport": viewport }))
            .await?
            .as_str()
            .map(String::from)
            .ok_or_else(|| Error::Protocol("newPage returned no page id".to_string()))?;
        debug!("Bridge opened {}", id);

        Ok(Arc::new(PlaywrightPage {
            id,
            bridge: self.bridge.clone(),
            viewport: Mutex::new(viewport),
            closed: AtomicBool::new(false),
        }))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.bridge.router.exited.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let closed = self.bridge.call("close", Value::Null).await;
        let mut child = self.bridge.child.lock().await;
        if let Err(e) = child.start_kill() {
            debug!("Bridge already gone: {}", e);
        }
        let _ = child.wait().await;
        closed.map(|_| ())
    }
}

pub struct PlaywrightPage {
    id: String,
    bridge: Arc<Bridge>,
    viewport: Mutex<Viewport>,
    closed: AtomicBool,
}

impl PlaywrightPage {
    async fn call(&self, method: &str, mut params: Value) -> Result<Value> {
        if self.is_closed() {
            return Err(Error::PageClosed(self.id.clone()));
        }
        if let Value::Object(map) = &mut params {
            map.insert("page".to_string(), Value::String(self.id.clone()));
        }
        self.bridge.call(method, params).await
    }

    async fn on(&self, method: &str, selector: &str) -> Result<Value> {
        self.call(method, json!({ "selector": selector })).await
    }

    async fn string(&self, method: &str, params: Value) -> Result<String> {
        match self.call(method, params).await? {
            Value::String(s) => Ok(s),
            Value::Null => Ok(String::new()),
            other => Ok(other.to_string()),
        }
    }
}

fn with_timeout(e: Error, timeout: Duration) -> Error {
    match e {
        Error::Timeout { what, .. } => Error::timeout(what, timeout.as_millis() as u64),
        other => other,
    }
}

#[async_trait]
impl Page for PlaywrightPage {
    fn id(&self) -> &str {
        &self.id
    }

    async fn goto(&self, url: &str, wait_until: LoadState, timeout: Duration) -> Result<()> {
        self.call(
            "goto",
            json!({ "url": url, "waitUntil": wait_until.as_str(), "timeout": timeout.as_millis() as u64 }),
        )
        .await
        .map_err(|e| with_timeout(e, timeout))?;
        Ok(())
    }

    async fn wait_for_load_state(&self, state: LoadState, timeout: Duration) -> Result<()> {
        self.call(
            "waitForLoadState",
            json!({ "state": state.as_str(), "timeout": timeout.as_millis() as u64 }),
        )
        .await
        .map_err(|e| with_timeout(e, timeout))?;
        Ok(())
    }

    async fn url(&self) -> Result<String> {
        self.string("url", json!({})).await
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.call("setViewport", json!({ "width": viewport.width, "height": viewport.height }))
            .await?;
        *self.viewport.lock() = viewport;
        Ok(())
    }

    async fn viewport(&self) -> Result<Viewport> {
        Ok(*self.viewport.lock())
    }

    async fn content(&self) -> Result<String> {
        self.string("content", json!({})).await
    }

    async fn evaluate(&self, expression: &str) -> Result<Value> {
        self.call("evaluate", json!({ "expression": expression })).await
    }

    async fn count(&self, selector: &str) -> Result<usize> {
        let count = self.on("count", selector).await?;
        count
            .as_u64()
            .map(|c| c as usize)
            .ok_or_else(|| Error::Protocol(format!("count returned {}", count)))
    }

    async fn bounding_box(&self, selector: &str) -> Result<Option<BoundingBox>> {
        match self.on("boundingBox", selector).await? {
            Value::Null => Ok(None),
            rect => Ok(Some(serde_json::from_value(rect)?)),
        }
    }

    async fn computed_style(&self, selector: &str, property: &str) -> Result<String> {
        self.string("computedStyle", json!({ "selector": selector, "property": property }))
            .await
    }

    async fn attribute(&self, selector: &str, name: &str) -> Result<Option<String>> {
        match self.call("attribute", json!({ "selector": selector, "name": name })).await? {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s)),
            other => Ok(Some(other.to_string())),
        }
    }

    async fn property(&self, selector: &str, name: &str) -> Result<Value> {
        self.call("property", json!({ "selector": selector, "name": name })).await
    }

    async fn text(&self, selector: &str) -> Result<String> {
        self.string("text", json!({ "selector": selector })).await
    }

    async fn tag_name(&self, selector: &str) -> Result<String> {
        self.string("tagName", json!({ "selector": selector })).await
    }

    async fn outer_html(&self, selector: &str) -> Result<String> {
        self.string("outerHtml", json!({ "selector": selector })).await
    }

    async fn hit_test(&self, selector: &str, point: Point) -> Result<bool> {
        let hit = self
            .call("hitTest", json!({ "selector": selector, "x": point.x, "y": point.y }))
            .await?;
        Ok(hit.as_bool().unwrap_or(false))
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.on("click", selector).await.map(|_| ())
    }

    async fn focus(&self, selector: &str) -> Result<()> {
        self.on("focus", selector).await.map(|_| ())
    }

    async fn fill(&self, selector: &str, value: &str) -> Result<()> {
        self.call("fill", json!({ "selector": selector, "value": value }))
            .await
            .map(|_| ())
    }

    async fn insert_text(&self, selector: &str, text: &str) -> Result<()> {
        self.call("insertText", json!({ "selector": selector, "text": text }))
            .await
            .map(|_| ())
    }

    async fn hover(&self, selector: &str) -> Result<()> {
        self.on("hover", selector).await.map(|_| ())
    }

    async fn scroll_into_view(&self, selector: &str) -> Result<()> {
        self.on("scrollIntoView", selector).await.map(|_| ())
    }

    async fn scroll_by(&self, dx: f64, dy: f64) -> Result<()> {
        self.call("scrollBy", json!({ "dx": dx, "dy": dy })).await.map(|_| ())
    }

    async fn scroll_to_bottom(&self) -> Result<()> {
        self.call("scrollToBottom", json!({})).await.map(|_| ())
    }

    async fn mouse_move(&self, point: Point, steps: u32) -> Result<()> {
        self.call("mouseMove", json!({ "x": point.x, "y": point.y, "steps": steps }))
            .await
            .map(|_| ())
    }

    async fn mouse_down(&self) -> Result<()> {
        self.call("mouseDown", json!({})).await.map(|_| ())
    }

    async fn mouse_up(&self) -> Result<()> {
        self.call("mouseUp", json!({})).await.map(|_| ())
    }

    async fn key_down(&self, key: &str) -> Result<()> {
        self.call("keyDown", json!({ "key": key })).await.map(|_| ())
    }

    async fn key_up(&self, key: &str) -> Result<()> {
        self.call("keyUp", json!({ "key": key })).await.map(|_| ())
    }

    async fn press_key(&self, key: &str) -> Result<()> {
        self.call("press", json!({ "key": key })).await.map(|_| ())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<Vec<String>> {
        let selected = self
            .call("selectOption", json!({ "selector": selector, "value": value }))
            .await?;
        Ok(serde_json::from_value(selected)?)
    }

    async fn set_checked(&self, selector: &str, checked: bool) -> Result<()> {
        self.call("setChecked", json!({ "selector": selector, "checked": checked }))
            .await
            .map(|_| ())
    }

    async fn screenshot(&self, options: ScreenshotOptions) -> Result<Vec<u8>> {
        let encoded = self
            .string("screenshot", json!({ "fullPage": options.full_page, "clip": options.clip }))
            .await?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Protocol(format!("screenshot payload: {}", e)))
    }

    fn subscribe(&self) -> UnboundedReceiver<TimedEvent> {
        let (tx, rx) = unbounded_channel();
        self.bridge
            .router
            .subscribers
            .lock()
            .entry(self.id.clone())
            .or_default()
            .push(tx);
        rx
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.bridge.router.subscribers.lock().remove(&self.id);
        self.bridge
            .call("closePage", json!({ "page": self.id }))
            .await
            .map(|_| ())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_routes_to_pending_call() {
        let router = Router::default();
        let (tx, mut rx) = oneshot::channel();
        router.pending.lock().insert(7, tx);
        router.route(r#"{"id":7,"result":"pw-page-1"}"#);
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!("pw-page-1"));
    }

    #[test]
    fn test_error_reply_maps_to_error_variant() {
        let router = Router::default();
        let (tx, mut rx) = oneshot::channel();
        router.pending.lock().insert(8, tx);
        router.route(
            r##"{"id":8,"error":{"code":"not_found","message":"Element not found: #go","selector":"#go"}}"##,
        );
        let err = rx.try_recv().unwrap().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Element not found: #go");
    }

    #[test]
    fn test_events_reach_page_subscribers() {
        let router = Router::default();
        let (tx, mut rx) = unbounded_channel();
        router.subscribers.lock().insert("pw-page-1".to_string(), vec![tx]);

        router.route(r#"{"event":"console","page":"pw-page-1","kind":"warning","text":"slow","location":null}"#);
        router.route(r#"{"event":"response","page":"pw-page-1","request_id":"3","url":"http://x/","status":404}"#);
        router.route(r#"{"event":"response","page":"pw-page-2","request_id":"1","url":"http://y/","status":200}"#);

        assert_eq!(
            rx.try_recv().unwrap().event,
            PageEvent::Console { level: ConsoleLevel::Warning, text: "slow".to_string(), location: None }
        );
        assert!(matches!(rx.try_recv().unwrap().event, PageEvent::Response { status: 404, .. }));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_keeps_bridge_timestamp() {
        let router = Router::default();
        let (tx, mut rx) = unbounded_channel();
        router.subscribers.lock().insert("pw-page-1".to_string(), vec![tx]);

        router.route(r#"{"event":"page_error","page":"pw-page-1","ts":1700000000123,"message":"boom"}"#);
        router.route(r#"{"event":"page_error","page":"pw-page-1","message":"late"}"#);

        let stamped = rx.try_recv().unwrap();
        assert_eq!(stamped.at.timestamp_millis(), 1_700_000_000_123);
        assert_eq!(stamped.event, PageEvent::PageError { message: "boom".to_string() });

        let unstamped = rx.try_recv().unwrap();
        assert!(unstamped.at > stamped.at);
    }

    #[test]
    fn test_shutdown_fails_pending_calls() {
        let router = Router::default();
        let (tx, mut rx) = oneshot::channel();
        router.pending.lock().insert(1, tx);
        router.shut_down("bridge process exited");
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::Protocol(_))));
        assert!(router.exited.load(Ordering::SeqCst));
    }

    #[test]
    fn test_missing_node_is_driver_not_found() {
        let config = BrowserConfig {
            node_binary: "/nonexistent/node".into(),
            ..BrowserConfig::default()
        };
        assert!(matches!(
            PlaywrightBrowser::check_playwright_installed(&config),
            Err(Error::DriverNotFound)
        ));
    }
}
