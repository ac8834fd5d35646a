//! Passive console and network monitoring
//!
//! A monitor is scoped to one run. `attach` registers a listener on the
//! page; events queue on that listener and are folded into the monitor's
//! records whenever it is queried, so nothing runs in the background.

mod console;
mod network;

pub use console::{ConsoleEntry, ConsoleMonitor, ConsoleSource};
pub use network::{NetworkMonitor, NetworkRecord};

use serde::{Deserialize, Serialize};

/// Result of a "nothing went wrong" assertion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionOutcome {
    pub passed: bool,
    pub message: String,
}

impl AssertionOutcome {
    pub fn pass(message: impl Into<String>) -> Self {
        Self {
            passed: true,
            message: message.into(),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            passed: false,
            message: message.into(),
        }
    }
}

fn compile_patterns(patterns: &[String]) -> crate::error::Result<Vec<regex::Regex>> {
    patterns
        .iter()
        .map(|p| regex::Regex::new(p).map_err(Into::into))
        .collect()
}
