//! Per-tab state stores.
//!
//! Each store is the only writer of its state. Readers take snapshots with
//! `get_state()`; change listeners run after every mutation that actually
//! changed something.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use super::actions::{
    FocusedInstancePayload, PageVisibilityChangePayload, TabAction, VisualizationTogglePayload,
};
use crate::browser::{Tab, TabId};
use crate::visualization::VisualizationType;

/// Injection is re-requested after a failure until this many attempts failed.
pub const MAX_INJECTION_ATTEMPTS: u8 = 3;

pub type ChangeListener<S> = Box<dyn Fn(&S)>;

/// Snapshot state plus the listeners interested in it.
pub struct Store<S> {
    state: S,
    listeners: Vec<ChangeListener<S>>,
}

impl<S: fmt::Debug> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("state", &self.state)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl<S: Clone> Store<S> {
    fn new(state: S) -> Self {
        Self {
            state,
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn get_state(&self) -> S {
        self.state.clone()
    }

    pub fn add_change_listener(&mut self, listener: impl Fn(&S) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Applies `mutate`; listeners run iff it reports a change.
    fn update(&mut self, mutate: impl FnOnce(&mut S) -> bool) -> bool {
        let changed = mutate(&mut self.state);
        if changed {
            for listener in &self.listeners {
                listener(&self.state);
            }
        }
        changed
    }
}

// ============================================================================
// Visualization store
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanData {
    pub enabled: bool,
    pub step_status: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualizationStoreData {
    /// Test whose scan is in flight. Toggles are rejected while set.
    pub scanning: Option<VisualizationType>,
    pub tests: BTreeMap<VisualizationType, ScanData>,
    pub injecting_requested: bool,
    pub injecting_started: bool,
    pub injection_attempts: u8,
    pub injection_failed: bool,
    pub focused_target: Option<Vec<String>>,
}

impl Default for VisualizationStoreData {
    fn default() -> Self {
        Self {
            scanning: None,
            tests: VisualizationType::ALL
                .into_iter()
                .map(|test| (test, ScanData::default()))
                .collect(),
            injecting_requested: false,
            injecting_started: false,
            injection_attempts: 0,
            injection_failed: false,
            focused_target: None,
        }
    }
}

impl VisualizationStoreData {
    #[must_use]
    pub fn is_enabled(&self, test: VisualizationType) -> bool {
        self.tests.get(&test).is_some_and(|scan| scan.enabled)
    }
}

#[derive(Debug)]
pub struct VisualizationStore {
    store: Store<VisualizationStoreData>,
}

impl Default for VisualizationStore {
    fn default() -> Self {
        Self {
            store: Store::new(VisualizationStoreData::default()),
        }
    }
}

impl VisualizationStore {
    #[must_use]
    pub fn get_state(&self) -> VisualizationStoreData {
        self.store.get_state()
    }

    pub fn add_change_listener(&mut self, listener: impl Fn(&VisualizationStoreData) + 'static) {
        self.store.add_change_listener(listener);
    }

    fn on_toggle(&mut self, payload: VisualizationTogglePayload) -> bool {
        self.store.update(|state| {
            if let Some(scanning) = state.scanning {
                tracing::debug!(%scanning, requested = %payload.test, "toggle rejected during scan");
                return false;
            }
            let scan = state.tests.entry(payload.test).or_default();
            if payload.enabled {
                scan.enabled = true;
                state.scanning = Some(payload.test);
                state.injecting_requested = true;
                true
            } else if scan.enabled {
                scan.enabled = false;
                scan.step_status.clear();
                true
            } else {
                false
            }
        })
    }

    fn on_scan_completed(&mut self) -> bool {
        self.store.update(|state| state.scanning.take().is_some())
    }

    fn on_scan_failed(&mut self) -> bool {
        self.store.update(|state| {
            let Some(test) = state.scanning.take() else {
                return false;
            };
            if let Some(scan) = state.tests.get_mut(&test) {
                scan.enabled = false;
            }
            true
        })
    }

    fn on_scroll_requested(&mut self) -> bool {
        self.store.update(|state| state.focused_target.take().is_some())
    }

    fn on_update_focused_instance(&mut self, payload: FocusedInstancePayload) -> bool {
        self.store.update(|state| {
            let changed = state.focused_target.as_ref() != Some(&payload.target);
            state.focused_target = Some(payload.target);
            changed
        })
    }

    fn on_injection_started(&mut self) -> bool {
        self.store.update(|state| {
            if state.injecting_started {
                return false;
            }
            state.injecting_requested = true;
            state.injecting_started = true;
            true
        })
    }

    fn on_injection_completed(&mut self) -> bool {
        self.store.update(|state| {
            state.injecting_requested = false;
            state.injecting_started = false;
            state.injection_attempts = 0;
            true
        })
    }

    fn on_injection_failed(&mut self) -> bool {
        self.store.update(|state| {
            state.injection_attempts = state.injection_attempts.saturating_add(1);
            state.injecting_started = false;
            if state.injection_attempts < MAX_INJECTION_ATTEMPTS {
                state.injecting_requested = true;
            } else {
                state.injecting_requested = false;
                state.injection_failed = true;
                tracing::warn!(attempts = state.injection_attempts, "injection gave up");
            }
            true
        })
    }

    /// A tracked tab navigated: every visualization state is stale.
    fn on_tab_change(&mut self) -> bool {
        self.store.update(|state| {
            let fresh = VisualizationStoreData::default();
            let changed = *state != fresh;
            *state = fresh;
            changed
        })
    }
}

// ============================================================================
// Tab store
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TabStoreData {
    pub id: Option<TabId>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub is_closed: bool,
    pub is_page_hidden: bool,
    pub is_changed: bool,
}

#[derive(Debug)]
pub struct TabStore {
    store: Store<TabStoreData>,
}

impl Default for TabStore {
    fn default() -> Self {
        Self {
            store: Store::new(TabStoreData::default()),
        }
    }
}

impl TabStore {
    #[must_use]
    pub fn get_state(&self) -> TabStoreData {
        self.store.get_state()
    }

    pub fn add_change_listener(&mut self, listener: impl Fn(&TabStoreData) + 'static) {
        self.store.add_change_listener(listener);
    }

    fn on_tab_update(&mut self, tab: Tab) -> bool {
        self.store.update(|state| {
            *state = TabStoreData {
                id: Some(tab.id),
                url: Some(tab.url),
                title: Some(tab.title),
                is_closed: false,
                is_page_hidden: state.is_page_hidden,
                is_changed: false,
            };
            true
        })
    }

    fn on_tab_change(&mut self, tab: Tab) -> bool {
        self.store.update(|state| {
            state.id = Some(tab.id);
            state.url = Some(tab.url);
            state.title = Some(tab.title);
            state.is_changed = true;
            true
        })
    }

    fn on_tab_remove(&mut self) -> bool {
        self.store.update(|state| !std::mem::replace(&mut state.is_closed, true))
    }

    fn on_visibility_change(&mut self, payload: PageVisibilityChangePayload) -> bool {
        self.store.update(|state| {
            let changed = state.is_page_hidden != payload.hidden;
            state.is_page_hidden = payload.hidden;
            changed
        })
    }
}

// ============================================================================
// StoreSet
// ============================================================================

/// Result of routing one action to its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretOutcome {
    /// The owning store accepted the action and its state changed.
    Applied,
    /// The owning store handled the action without changing state, or
    /// rejected it (e.g. a toggle during a scan).
    Unchanged,
    /// No store owns this action type.
    Ignored,
}

impl InterpretOutcome {
    const fn from_changed(changed: bool) -> Self {
        if changed { Self::Applied } else { Self::Unchanged }
    }
}

/// The isolated set of stores behind one tab.
#[derive(Debug, Default)]
pub struct StoreSet {
    visualization: VisualizationStore,
    tab: TabStore,
}

impl StoreSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn visualization(&self) -> &VisualizationStore {
        &self.visualization
    }

    pub fn visualization_mut(&mut self) -> &mut VisualizationStore {
        &mut self.visualization
    }

    #[must_use]
    pub const fn tab(&self) -> &TabStore {
        &self.tab
    }

    pub fn tab_mut(&mut self) -> &mut TabStore {
        &mut self.tab
    }

    /// Routes `action` to the single store that owns it.
    pub(crate) fn dispatch(&mut self, action: TabAction) -> InterpretOutcome {
        let changed = match action {
            TabAction::Toggle(payload) => self.visualization.on_toggle(payload),
            TabAction::ScanCompleted => self.visualization.on_scan_completed(),
            TabAction::ScanFailed => self.visualization.on_scan_failed(),
            TabAction::ScrollRequested => self.visualization.on_scroll_requested(),
            TabAction::UpdateFocusedInstance(payload) => {
                self.visualization.on_update_focused_instance(payload)
            }
            TabAction::InjectionStarted => self.visualization.on_injection_started(),
            TabAction::InjectionCompleted => self.visualization.on_injection_completed(),
            TabAction::InjectionFailed => self.visualization.on_injection_failed(),
            TabAction::TabUpdate(tab) => self.tab.on_tab_update(tab),
            TabAction::TabChange(tab) => {
                let visualization = self.visualization.on_tab_change();
                self.tab.on_tab_change(tab) || visualization
            }
            TabAction::TabRemove => self.tab.on_tab_remove(),
            TabAction::VisibilityChange(payload) => self.tab.on_visibility_change(payload),
            TabAction::Unknown(message_type) => {
                tracing::debug!(%message_type, "no store handles action");
                return InterpretOutcome::Ignored;
            }
        };
        InterpretOutcome::from_changed(changed)
    }
}
