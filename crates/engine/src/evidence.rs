//! Evidence file naming

use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use uuid::Uuid;

/// Millisecond timestamps that never repeat within one instance
///
/// Evidence files are keyed by path, so two captures in the same
/// millisecond must still get distinct names. The tag does the same for
/// separate instances writing into one directory.
#[derive(Debug)]
pub struct EvidenceClock {
    tag: String,
    last: AtomicI64,
}

impl Default for EvidenceClock {
    fn default() -> Self {
        let mut tag = Uuid::new_v4().simple().to_string();
        tag.truncate(8);
        Self {
            tag,
            last: AtomicI64::new(0),
        }
    }
}

impl EvidenceClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short identifier unique to this instance
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn next_millis(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self
                .last
                .compare_exchange(last, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(current) => last = current,
            }
        }
    }
}

/// Keep selectors and ids filesystem-safe
pub fn sanitize(part: &str) -> String {
    let cleaned: String = part
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "x".to_string()
    } else {
        trimmed.to_string()
    }
}

pub(crate) fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, bytes)?;
    Ok(path)
}
