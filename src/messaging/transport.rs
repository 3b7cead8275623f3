//! Window transport seam.
//!
//! A [`Transport`] is bound to the window its handler lives in. Posting sends
//! one serialized envelope to another window; listeners receive every raw unit
//! addressed to the bound window together with the sender's [`WindowRef`].
//!
//! [`WindowNetwork`] is an in-memory implementation. Posted units are queued
//! and only delivered when the host drives the network, which mirrors the
//! asynchronous delivery of real window messaging.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;

/// Opaque handle naming one window (top document, frame, or background page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowRef(u64);

impl WindowRef {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for WindowRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "window#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Receives `(raw, source_window)` for every unit delivered to the bound window.
pub type WindowMessageListener = Rc<dyn Fn(&str, WindowRef)>;

pub trait Transport {
    /// The window this transport is bound to.
    fn window(&self) -> WindowRef;

    fn post_message(&self, target: WindowRef, data: String);

    fn add_listener(&self, listener: WindowMessageListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);
}

/// A unit posted through a [`WindowNetwork`], kept for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub source: WindowRef,
    pub target: WindowRef,
    pub data: String,
}

#[derive(Default)]
struct NetworkState {
    next_listener_id: u64,
    listeners: HashMap<WindowRef, Vec<(ListenerId, WindowMessageListener)>>,
    queue: VecDeque<PostedMessage>,
    log: Vec<PostedMessage>,
}

/// In-memory window network shared by every [`WindowTransport`] it hands out.
///
/// Every unit posted or injected is also appended to a log for inspection.
/// The log is only emptied by [`take_posted`](Self::take_posted), so a
/// long-lived network should drain it periodically.
#[derive(Clone, Default)]
pub struct WindowNetwork {
    state: Rc<RefCell<NetworkState>>,
}

impl fmt::Debug for WindowNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("WindowNetwork")
            .field("windows", &state.listeners.len())
            .field("queued", &state.queue.len())
            .field("posted", &state.log.len())
            .finish()
    }
}

impl WindowNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a transport bound to `window`.
    #[must_use]
    pub fn transport(&self, window: WindowRef) -> WindowTransport {
        WindowTransport {
            window,
            network: self.clone(),
        }
    }

    #[must_use]
    pub fn queued(&self) -> usize {
        self.state.borrow().queue.len()
    }

    /// Every unit ever posted on this network, in posting order.
    #[must_use]
    pub fn posted(&self) -> Vec<PostedMessage> {
        self.state.borrow().log.clone()
    }

    /// Drains the log, returning what it held. Queued units are unaffected.
    pub fn take_posted(&self) -> Vec<PostedMessage> {
        std::mem::take(&mut self.state.borrow_mut().log)
    }

    /// Injects a raw unit as if `source` had posted it to `target`.
    pub fn inject(&self, source: WindowRef, target: WindowRef, data: impl Into<String>) {
        self.enqueue(PostedMessage {
            source,
            target,
            data: data.into(),
        });
    }

    /// Delivers the oldest queued unit. Returns `false` when the queue is empty.
    pub fn deliver_next(&self) -> bool {
        let Some(message) = self.state.borrow_mut().queue.pop_front() else {
            return false;
        };
        let listeners: Vec<WindowMessageListener> = self
            .state
            .borrow()
            .listeners
            .get(&message.target)
            .map(|entries| entries.iter().map(|(_, l)| Rc::clone(l)).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(&message.data, message.source);
        }
        true
    }

    /// Delivers until the queue drains, including units posted by listeners
    /// while delivering. Returns the number of units delivered.
    pub fn run_until_idle(&self) -> usize {
        let mut delivered = 0;
        while self.deliver_next() {
            delivered += 1;
        }
        delivered
    }

    fn enqueue(&self, message: PostedMessage) {
        let mut state = self.state.borrow_mut();
        state.log.push(message.clone());
        state.queue.push_back(message);
    }
}

/// [`Transport`] bound to one window of a [`WindowNetwork`].
#[derive(Debug, Clone)]
pub struct WindowTransport {
    window: WindowRef,
    network: WindowNetwork,
}

impl Transport for WindowTransport {
    fn window(&self) -> WindowRef {
        self.window
    }

    fn post_message(&self, target: WindowRef, data: String) {
        self.network.enqueue(PostedMessage {
            source: self.window,
            target,
            data,
        });
    }

    fn add_listener(&self, listener: WindowMessageListener) -> ListenerId {
        let mut state = self.network.state.borrow_mut();
        state.next_listener_id += 1;
        let id = ListenerId(state.next_listener_id);
        state
            .listeners
            .entry(self.window)
            .or_default()
            .push((id, listener));
        id
    }

    fn remove_listener(&self, id: ListenerId) {
        let mut state = self.network.state.borrow_mut();
        if let Some(entries) = state.listeners.get_mut(&self.window) {
            entries.retain(|(existing, _)| *existing != id);
        }
    }
}
