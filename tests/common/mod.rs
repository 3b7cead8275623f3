//! Shared fixtures for integration tests: an in-memory browser and helpers
//! for wiring message handlers onto a [`WindowNetwork`].

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use async_trait::async_trait;
use insights::browser::{BrowserAdapter, Tab, TabId};
use insights::commands::CommandGuard;
use insights::messaging::frame_query::{
    GestureKind, GestureSurface, OverlayId, PointerEvent, PointerListener,
};
use insights::messaging::transport::WindowNetwork;
use insights::messaging::{ListenerId, Marshaller, MessageHandler, WindowRef};
use insights::tabs::{TabContextRegistry, TabController};
use insights::user_config::{UserConfigurationData, UserConfigurationStore};

pub const TOP: WindowRef = WindowRef::new(1);
pub const FRAME: WindowRef = WindowRef::new(2);
pub const NESTED: WindowRef = WindowRef::new(3);

// ═══════════════════════════════════════════════════════════════════════════
// Browser
// ═══════════════════════════════════════════════════════════════════════════

/// Browser whose tabs, active tab and file-URL permission are set by the test.
#[derive(Default)]
pub struct FakeBrowser {
    pub tabs: RefCell<Vec<Tab>>,
    pub file_access: Cell<bool>,
    pub notifications: RefCell<Vec<String>>,
}

impl FakeBrowser {
    pub fn with_tabs(tabs: Vec<Tab>) -> Rc<Self> {
        Rc::new(Self {
            tabs: RefCell::new(tabs),
            ..Self::default()
        })
    }

    pub fn activate(&self, tab_id: TabId) {
        for tab in self.tabs.borrow_mut().iter_mut() {
            tab.active = tab.id == tab_id;
        }
    }

    pub fn navigate(&self, tab_id: TabId, url: &str) {
        if let Some(tab) = self.tabs.borrow_mut().iter_mut().find(|tab| tab.id == tab_id) {
            tab.url = url.to_string();
        }
    }

    pub fn close(&self, tab_id: TabId) {
        self.tabs.borrow_mut().retain(|tab| tab.id != tab_id);
    }

    pub fn notifications(&self) -> Vec<String> {
        self.notifications.borrow().clone()
    }
}

#[async_trait(?Send)]
impl BrowserAdapter for FakeBrowser {
    async fn active_tab(&self) -> Option<Tab> {
        self.tabs.borrow().iter().find(|tab| tab.active).cloned()
    }

    async fn get_tab(&self, tab_id: TabId) -> Option<Tab> {
        self.tabs.borrow().iter().find(|tab| tab.id == tab_id).cloned()
    }

    async fn all_tabs(&self) -> Vec<Tab> {
        self.tabs.borrow().clone()
    }

    async fn allows_file_scheme_access(&self) -> bool {
        self.file_access.get()
    }

    fn create_notification(&self, message: &str) {
        self.notifications.borrow_mut().push(message.to_string());
    }
}

/// Registry, controller and command guard sharing one [`FakeBrowser`].
pub struct Background {
    pub browser: Rc<FakeBrowser>,
    pub registry: Rc<RefCell<TabContextRegistry>>,
    pub user_config: Rc<RefCell<UserConfigurationStore>>,
    pub controller: TabController,
    pub guard: CommandGuard,
}

impl Background {
    /// Consent already answered, so commands are not first-run gated.
    pub fn new(tabs: Vec<Tab>) -> Self {
        Self::with_user_config(
            tabs,
            UserConfigurationData {
                is_first_time: false,
                enable_telemetry: true,
            },
        )
    }

    pub fn with_user_config(tabs: Vec<Tab>, user: UserConfigurationData) -> Self {
        let browser = FakeBrowser::with_tabs(tabs);
        let registry = Rc::new(RefCell::new(TabContextRegistry::new()));
        let user_config = Rc::new(RefCell::new(UserConfigurationStore::new(user)));
        let adapter: Rc<dyn BrowserAdapter> = Rc::clone(&browser) as Rc<dyn BrowserAdapter>;
        let controller = TabController::new(Rc::clone(&registry), Rc::clone(&adapter));
        let guard = CommandGuard::new(Rc::clone(&registry), adapter, Rc::clone(&user_config));
        Self {
            browser,
            registry,
            user_config,
            controller,
            guard,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Windows
// ═══════════════════════════════════════════════════════════════════════════

pub fn marshaller() -> Marshaller {
    Marshaller::new("Accessibility Insights for Web", "2.0.0")
}

/// An initialized handler bound to `window` on `network`.
pub fn window_handler(network: &WindowNetwork, window: WindowRef) -> MessageHandler {
    let handler = MessageHandler::new(Rc::new(network.transport(window)), marshaller());
    handler.initialize();
    handler
}

/// Pointer source and overlay host driven by the test.
#[derive(Default)]
pub struct FakeSurface {
    next: Cell<u64>,
    listeners: RefCell<Vec<(ListenerId, GestureKind, PointerListener)>>,
    overlays: RefCell<Vec<OverlayId>>,
}

impl FakeSurface {
    pub fn fire(&self, kind: GestureKind, x: f64, y: f64) {
        let listeners: Vec<PointerListener> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect();
        for listener in listeners {
            listener(PointerEvent { x, y });
        }
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn overlay_count(&self) -> usize {
        self.overlays.borrow().len()
    }
}

impl GestureSurface for FakeSurface {
    fn add_listener(&self, kind: GestureKind, listener: PointerListener) -> ListenerId {
        self.next.set(self.next.get() + 1);
        let id = ListenerId::new(self.next.get());
        self.listeners.borrow_mut().push((id, kind, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(existing, _, _)| *existing != id);
    }

    fn mount_overlay(&self) -> OverlayId {
        self.next.set(self.next.get() + 1);
        let id = OverlayId(self.next.get());
        self.overlays.borrow_mut().push(id);
        id
    }

    fn unmount_overlay(&self, id: OverlayId) {
        self.overlays.borrow_mut().retain(|existing| *existing != id);
    }
}
