//! uiproof UI verification engine
//!
//! This crate drives a real browser through a declarative test definition
//! and decides whether the UI did what was expected:
//! - Loads YAML/JSON test definitions (actions plus expectations)
//! - Controls Playwright through a long-lived JSON-lines bridge
//! - Checks element state, text, styles and accessibility attributes
//! - Captures screenshots and DOM snapshots as evidence and diffs them
//! - Watches console output and network traffic for anomalies
//! - Produces a passed / partial pass / failed / errored verdict
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     TestExecutor                            │
//! │    ├── run(def) -> TestResult                               │
//! │    └── run_all(defs) -> SuiteSummary                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ActionExecutor      StateVerifier      VisualVerifier      │
//! │    └── Waiter          └── probe          └── image diff    │
//! │  ConsoleMonitor      NetworkMonitor                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  PageManager (one isolated page per run)                    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Browser / Page traits                                      │
//! │    ├── PlaywrightBrowser (node bridge)                      │
//! │    └── SimulatedBrowser (in-memory, deterministic)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod action;
pub mod config;
pub mod definition;
pub mod driver;
pub mod error;
pub mod evidence;
pub mod executor;
pub mod lifecycle;
pub mod monitor;
pub mod playwright;
pub mod probe;
pub mod result;
pub mod simulated;
pub mod state;
pub mod visual;
pub mod wait;

pub use action::{ActionExecutor, ActionOutcome};
pub use config::{BrowserKind, EngineConfig};
pub use definition::{TestDefinition, UiAction, UiExpectation};
pub use driver::{Browser, Page};
pub use error::{Error, Result};
pub use executor::TestExecutor;
pub use lifecycle::{PageHandle, PageManager};
pub use monitor::{ConsoleMonitor, NetworkMonitor};
pub use playwright::PlaywrightBrowser;
pub use result::{SuiteSummary, TestResult, TestStatus};
pub use simulated::SimulatedBrowser;
pub use state::StateVerifier;
pub use visual::VisualVerifier;
