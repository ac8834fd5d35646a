//! Page and browser lifecycle
//!
//! The [`PageManager`] is the only mutable resource shared between
//! concurrent runs. Each page it hands out lives in its own browsing
//! context; create and close operate on independent handles and only
//! touch the registry under a short lock.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::definition::Viewport;
use crate::driver::{Browser, Page};
use crate::error::{Error, Result};

/// Exclusive handle to one open page
#[derive(Clone)]
pub struct PageHandle {
    page: Arc<dyn Page>,
}

impl PageHandle {
    pub fn id(&self) -> &str {
        self.page.id()
    }

    pub fn page(&self) -> &dyn Page {
        self.page.as_ref()
    }
}

impl Deref for PageHandle {
    type Target = dyn Page;

    fn deref(&self) -> &Self::Target {
        self.page.as_ref()
    }
}

impl std::fmt::Debug for PageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageHandle").field("id", &self.id()).finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerStatus {
    pub browser_open: bool,
    pub context_open: bool,
    pub page_count: usize,
}

/// Creates, tracks and tears down pages
pub struct PageManager {
    browser: Arc<dyn Browser>,
    default_viewport: Viewport,
    pages: RwLock<HashMap<String, Arc<dyn Page>>>,
    shut_down: AtomicBool,
}

impl PageManager {
    pub fn new(browser: Arc<dyn Browser>, default_viewport: Viewport) -> Self {
        Self {
            browser,
            default_viewport,
            pages: RwLock::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Open a page in a fresh context with the default viewport
    pub async fn create_page(&self) -> Result<PageHandle> {
        self.create_page_with(None).await
    }

    pub async fn create_page_with(&self, viewport: Option<Viewport>) -> Result<PageHandle> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(Error::driver("page manager has been cleaned up"));
        }
        let viewport = viewport.unwrap_or(self.default_viewport);
        let page = self.browser.new_page(viewport).await?;
        let id = page.id().to_string();

        // cleanup may have started while the page was opening
        let registered = {
            let mut pages = self.pages.write();
            let open = !self.shut_down.load(Ordering::SeqCst);
            if open {
                pages.insert(id.clone(), page.clone());
            }
            open
        };
        if !registered {
            if let Err(e) = page.close().await {
                warn!("Failed to close page {} opened during cleanup: {}", id, e);
            }
            return Err(Error::driver("page manager has been cleaned up"));
        }
        debug!("Opened page {} ({}x{})", id, viewport.width, viewport.height);

        Ok(PageHandle { page })
    }

    pub async fn set_viewport(&self, handle: &PageHandle, viewport: Viewport) -> Result<()> {
        if viewport.width == 0 || viewport.height == 0 {
            return Err(Error::InvalidConfig(format!(
                "viewport must be non-zero, got {}x{}",
                viewport.width, viewport.height
            )));
        }
        handle.set_viewport(viewport).await
    }

    /// Close a page and its context. The page leaves the registry even if
    /// the driver reports a failure.
    pub async fn close_page(&self, handle: &PageHandle) -> Result<()> {
        let removed = self.pages.write().remove(handle.id());
        if removed.is_none() {
            debug!("Page {} was already closed", handle.id());
            return Ok(());
        }
        handle.page.close().await?;
        debug!("Closed page {}", handle.id());
        Ok(())
    }

    /// Close every outstanding page, then the browser
    pub async fn cleanup(&self) -> Result<()> {
        self.shut_down.store(true, Ordering::SeqCst);
        let pages: Vec<_> = self.pages.write().drain().collect();
        let mut failures = Vec::new();

        for (id, page) in pages {
            if let Err(e) = page.close().await {
                warn!("Failed to close page {}: {}", id, e);
                failures.push(id);
            }
        }

        if self.browser.is_connected() {
            self.browser.close().await?;
        }
        info!("Browser lifecycle cleaned up");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::driver(format!("failed to close pages: {}", failures.join(", "))))
        }
    }

    pub fn status(&self) -> ManagerStatus {
        let page_count = self.pages.read().len();
        ManagerStatus {
            browser_open: self.browser.is_connected() && !self.shut_down.load(Ordering::SeqCst),
            context_open: page_count > 0,
            page_count,
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::SimulatedBrowser;

    fn manager() -> (SimulatedBrowser, Arc<PageManager>) {
        let browser = SimulatedBrowser::new();
        let manager = PageManager::new(Arc::new(browser.clone()), Viewport::default());
        (browser, Arc::new(manager))
    }

    #[tokio::test]
    async fn test_create_and_close() {
        let (browser, manager) = manager();
        let page = manager.create_page().await.unwrap();
        assert_eq!(manager.status().page_count, 1);
        assert!(manager.status().context_open);
        assert_eq!(page.viewport().await.unwrap(), Viewport::default());

        manager.close_page(&page).await.unwrap();
        assert_eq!(manager.page_count(), 0);
        assert_eq!(browser.open_pages(), 0);

        // closing twice is a no-op
        manager.close_page(&page).await.unwrap();
    }

    #[tokio::test]
    async fn test_set_viewport() {
        let (_browser, manager) = manager();
        let page = manager.create_page().await.unwrap();
        let small = Viewport { width: 375, height: 667 };
        manager.set_viewport(&page, small).await.unwrap();
        assert_eq!(page.viewport().await.unwrap(), small);
        assert!(manager.set_viewport(&page, Viewport { width: 0, height: 10 }).await.is_err());
    }

    #[tokio::test]
    async fn test_close_failure_still_unregisters() {
        let (browser, manager) = manager();
        let page = manager.create_page().await.unwrap();
        browser.fail_close(true);
        assert!(manager.close_page(&page).await.is_err());
        assert_eq!(manager.page_count(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_pages_are_isolated() {
        let (_browser, manager) = manager();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            tasks.push(tokio::spawn(async move {
                let page = manager.create_page().await.unwrap();
                let id = page.id().to_string();
                manager.close_page(&page).await.unwrap();
                id
            }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap());
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 8);
        assert_eq!(manager.page_count(), 0);
    }

    /// Hands out pages only once released, to interleave creation with cleanup
    struct GatedBrowser {
        inner: SimulatedBrowser,
        gate: tokio::sync::Notify,
    }

    #[async_trait::async_trait]
    impl Browser for GatedBrowser {
        async fn new_page(&self, viewport: Viewport) -> Result<Arc<dyn Page>> {
            let page = self.inner.new_page(viewport).await?;
            self.gate.notified().await;
            Ok(page)
        }

        fn is_connected(&self) -> bool {
            self.inner.is_connected()
        }

        async fn close(&self) -> Result<()> {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn test_page_opened_during_cleanup_is_closed() {
        let inner = SimulatedBrowser::new();
        let browser = Arc::new(GatedBrowser {
            inner: inner.clone(),
            gate: tokio::sync::Notify::new(),
        });
        let manager = Arc::new(PageManager::new(browser.clone(), Viewport::default()));

        let creating = tokio::spawn({
            let manager = manager.clone();
            async move { manager.create_page().await }
        });
        while inner.open_pages() == 0 {
            tokio::task::yield_now().await;
        }

        manager.cleanup().await.unwrap();
        browser.gate.notify_one();

        assert!(creating.await.unwrap().is_err());
        assert_eq!(manager.page_count(), 0);
        assert_eq!(inner.open_pages(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_closes_everything() {
        let (browser, manager) = manager();
        manager.create_page().await.unwrap();
        manager.create_page().await.unwrap();

        manager.cleanup().await.unwrap();
        let status = manager.status();
        assert_eq!(status, ManagerStatus { browser_open: false, context_open: false, page_count: 0 });
        assert_eq!(browser.open_pages(), 0);
        assert!(manager.create_page().await.is_err());
    }
}
