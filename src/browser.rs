//! Host browser seam.
//!
//! The bridge never talks to a browser API directly. Everything it needs from
//! the host (tab lookups, file-scheme permission, user notifications) goes
//! through [`BrowserAdapter`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type TabId = u32;

pub type WindowId = u32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub window_id: Option<WindowId>,
    #[serde(default)]
    pub active: bool,
}

impl Tab {
    #[must_use]
    pub fn new(id: TabId, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            title: String::new(),
            window_id: None,
            active: false,
        }
    }

    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    #[must_use]
    pub const fn in_window(mut self, window_id: WindowId) -> Self {
        self.window_id = Some(window_id);
        self
    }

    #[must_use]
    pub const fn activated(mut self) -> Self {
        self.active = true;
        self
    }
}

/// Snapshot of one browser window for focus handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserWindow {
    pub id: WindowId,
    pub minimized: bool,
    pub tabs: Vec<Tab>,
}

impl BrowserWindow {
    #[must_use]
    pub fn active_tab(&self) -> Option<&Tab> {
        self.tabs.iter().find(|tab| tab.active)
    }
}

#[async_trait(?Send)]
pub trait BrowserAdapter {
    /// Active tab of the last focused window.
    async fn active_tab(&self) -> Option<Tab>;

    async fn get_tab(&self, tab_id: TabId) -> Option<Tab>;

    async fn all_tabs(&self) -> Vec<Tab>;

    /// Whether the user granted the extension access to `file://` pages.
    async fn allows_file_scheme_access(&self) -> bool;

    /// Shows a user-visible notification. Fire and forget.
    fn create_notification(&self, message: &str);
}
