//! Keeps the tab context registry in step with browser tab events.

use std::cell::RefCell;
use std::rc::Rc;

use super::actions::{PageVisibilityChangePayload, TabAction};
use super::stores::InterpretOutcome;
use super::TabContextRegistry;
use crate::browser::{BrowserAdapter, BrowserWindow, Tab, TabId};
use crate::logging;

/// Frame id the browser reports for a tab's top-level document.
pub const TOP_FRAME_ID: u32 = 0;

pub struct TabController {
    registry: Rc<RefCell<TabContextRegistry>>,
    browser: Rc<dyn BrowserAdapter>,
}

impl std::fmt::Debug for TabController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TabController")
            .field("tracked", &self.registry.borrow().len())
            .finish_non_exhaustive()
    }
}

impl TabController {
    #[must_use]
    pub fn new(
        registry: Rc<RefCell<TabContextRegistry>>,
        browser: Rc<dyn BrowserAdapter>,
    ) -> Self {
        Self { registry, browser }
    }

    /// Tracks every tab currently open. Returns the number of tabs added.
    pub async fn initialize(&self) -> usize {
        let tabs = self.browser.all_tabs().await;
        let added = tabs.len();
        for tab in tabs {
            self.add_tab(tab);
        }
        tracing::info!(tabs = added, "tab controller initialized");
        added
    }

    /// Sub-frame navigations are ignored.
    pub async fn on_tab_navigated(&self, tab_id: TabId, frame_id: u32) {
        if frame_id == TOP_FRAME_ID {
            self.handle_tab_update(tab_id).await;
        }
    }

    /// Updates that do not report a url (title, favicon, loading state) are
    /// ignored.
    pub async fn on_tab_url_changed(&self, tab_id: TabId, new_url: Option<&str>) {
        if new_url.is_some() {
            self.handle_tab_update(tab_id).await;
        }
    }

    /// Marks `tab_id` visible and every other tab of its window hidden.
    pub fn on_tab_activated(&self, tab_id: TabId, window_tabs: &[Tab]) {
        for tab in window_tabs {
            self.send(
                tab.id,
                TabAction::VisibilityChange(PageVisibilityChangePayload {
                    hidden: tab.id != tab_id,
                }),
            );
        }
    }

    /// The active tab of each window is hidden iff its window is minimized.
    pub fn on_window_focus_changed(&self, windows: &[BrowserWindow]) {
        for window in windows {
            if let Some(tab) = window.active_tab() {
                self.send(
                    tab.id,
                    TabAction::VisibilityChange(PageVisibilityChangePayload {
                        hidden: window.minimized,
                    }),
                );
            }
        }
    }

    pub fn on_tab_removed(&self, tab_id: TabId) {
        self.send(tab_id, TabAction::TabRemove);
        if self.registry.borrow_mut().unregister(tab_id).is_err() {
            tracing::debug!(tab_id, "removed tab was not tracked");
        }
    }

    async fn handle_tab_update(&self, tab_id: TabId) {
        let Some(tab) = self.browser.get_tab(tab_id).await else {
            tracing::warn!(tab_id, "updated tab no longer exists");
            return;
        };
        let tracked = self.registry.borrow().contains(tab_id);
        if tracked {
            self.send(tab_id, TabAction::TabChange(tab));
        } else {
            self.add_tab(tab);
        }
    }

    fn add_tab(&self, tab: Tab) {
        let tab_id = tab.id;
        let _span = logging::tab_span(tab_id).entered();
        tracing::debug!(url = %logging::redact_url(&tab.url), "tracking tab");
        let mut registry = self.registry.borrow_mut();
        registry
            .register(tab_id)
            .interpreter_mut()
            .dispatch(TabAction::TabUpdate(tab));
    }

    fn send(&self, tab_id: TabId, action: TabAction) -> Option<InterpretOutcome> {
        let _span = logging::tab_span(tab_id).entered();
        let mut registry = self.registry.borrow_mut();
        let Some(context) = registry.get_mut(tab_id) else {
            tracing::debug!(action = action.message_type(), "no context for tab");
            return None;
        };
        Some(context.interpreter_mut().dispatch(action))
    }
}
