//! Debounced element lookup for pointer gestures.
//!
//! Click and hover are independent channels. Each pointer event restarts its
//! channel's timer; when the timer expires one lookup request carrying the last
//! event's coordinates is posted through the [`MessageHandler`]. A response is
//! only delivered if no newer gesture of the same kind started after the
//! request went out.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::timer::{Scheduler, TimerId};
use super::transport::{ListenerId, WindowRef};
use super::{MessageHandler, Reply};
use crate::config::BridgeConfig;

pub const DEFAULT_CLICK_DEBOUNCE: Duration = Duration::from_millis(10);
pub const DEFAULT_HOVER_DEBOUNCE: Duration = Duration::from_millis(50);
pub const FIND_ELEMENT_COMMAND: &str = "insights.findElementByPosition";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureKind {
    Click,
    Hover,
}

impl GestureKind {
    const fn index(self) -> usize {
        match self {
            Self::Click => 0,
            Self::Hover => 1,
        }
    }
}

/// Pointer position in client coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointerEvent {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayId(pub u64);

pub type PointerListener = Rc<dyn Fn(PointerEvent)>;

/// Where pointer events come from and where the scoping overlay lives.
pub trait GestureSurface {
    fn add_listener(&self, kind: GestureKind, listener: PointerListener) -> ListenerId;

    fn remove_listener(&self, id: ListenerId);

    fn mount_overlay(&self) -> OverlayId;

    fn unmount_overlay(&self, id: OverlayId);
}

/// Element the frame tree resolved for a gesture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    /// Selector path, outermost frame first.
    pub path: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GestureResolution {
    pub event: PointerEvent,
    pub target: ResolvedTarget,
}

pub type ResolutionConsumer = Rc<dyn Fn(GestureResolution)>;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameQueryConfig {
    pub target: WindowRef,
    pub command: String,
    pub click_debounce: Duration,
    pub hover_debounce: Duration,
}

impl FrameQueryConfig {
    #[must_use]
    pub fn new(target: WindowRef) -> Self {
        Self {
            target,
            command: FIND_ELEMENT_COMMAND.to_string(),
            click_debounce: DEFAULT_CLICK_DEBOUNCE,
            hover_debounce: DEFAULT_HOVER_DEBOUNCE,
        }
    }

    #[must_use]
    pub fn from_bridge_config(target: WindowRef, config: &BridgeConfig) -> Self {
        Self {
            click_debounce: Duration::from_millis(config.click_debounce_ms),
            hover_debounce: Duration::from_millis(config.hover_debounce_ms),
            ..Self::new(target)
        }
    }

    const fn debounce(&self, kind: GestureKind) -> Duration {
        match kind {
            GestureKind::Click => self.click_debounce,
            GestureKind::Hover => self.hover_debounce,
        }
    }
}

#[derive(Default)]
struct Channel {
    timer: Option<TimerId>,
    last_event: Option<PointerEvent>,
    generation: u64,
    consumer: Option<ResolutionConsumer>,
}

#[derive(Default)]
struct QueryState {
    listeners: Vec<ListenerId>,
    overlay: Option<OverlayId>,
    channels: [Channel; 2],
}

struct Inner {
    config: FrameQueryConfig,
    handler: MessageHandler,
    scheduler: Rc<dyn Scheduler>,
    surface: Rc<dyn GestureSurface>,
    state: RefCell<QueryState>,
}

/// Cancellable, debounced click/hover lookup.
#[derive(Clone)]
pub struct DebouncedFrameQuery {
    inner: Rc<Inner>,
}

impl fmt::Debug for DebouncedFrameQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DebouncedFrameQuery")
            .field("config", &self.inner.config)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

impl DebouncedFrameQuery {
    #[must_use]
    pub fn new(
        config: FrameQueryConfig,
        handler: MessageHandler,
        scheduler: Rc<dyn Scheduler>,
        surface: Rc<dyn GestureSurface>,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                config,
                handler,
                scheduler,
                surface,
                state: RefCell::new(QueryState::default()),
            }),
        }
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.inner.state.borrow().overlay.is_some()
    }

    /// Subscribes both pointer listeners and mounts the overlay. A second call
    /// while started is a no-op.
    pub fn start(&self, on_click: ResolutionConsumer, on_hover: ResolutionConsumer) {
        if self.is_started() {
            return;
        }
        let overlay = self.inner.surface.mount_overlay();
        let listeners = [GestureKind::Click, GestureKind::Hover].map(|kind| {
            let weak = Rc::downgrade(&self.inner);
            self.inner.surface.add_listener(
                kind,
                Rc::new(move |event| {
                    if let Some(inner) = weak.upgrade() {
                        Inner::on_pointer_event(&inner, kind, event);
                    }
                }),
            )
        });

        let mut state = self.inner.state.borrow_mut();
        state.overlay = Some(overlay);
        state.listeners = listeners.to_vec();
        state.channels[GestureKind::Click.index()].consumer = Some(on_click);
        state.channels[GestureKind::Hover.index()].consumer = Some(on_hover);
        drop(state);
        tracing::debug!("frame query started");
    }

    /// Unsubscribes, unmounts the overlay, clears pending timers and discards
    /// any in-flight lookups. Safe to call repeatedly.
    pub fn stop(&self) {
        let (listeners, overlay, timers) = {
            let mut state = self.inner.state.borrow_mut();
            let timers: Vec<TimerId> = state
                .channels
                .iter_mut()
                .filter_map(|channel| {
                    channel.generation += 1;
                    channel.last_event = None;
                    channel.consumer = None;
                    channel.timer.take()
                })
                .collect();
            (
                std::mem::take(&mut state.listeners),
                state.overlay.take(),
                timers,
            )
        };
        for id in listeners {
            self.inner.surface.remove_listener(id);
        }
        for id in timers {
            self.inner.scheduler.clear_timeout(id);
        }
        if let Some(overlay) = overlay {
            self.inner.surface.unmount_overlay(overlay);
            tracing::debug!("frame query stopped");
        }
    }
}

impl Inner {
    fn on_pointer_event(this: &Rc<Self>, kind: GestureKind, event: PointerEvent) {
        let previous_timer = {
            let mut state = this.state.borrow_mut();
            let channel = &mut state.channels[kind.index()];
            channel.generation += 1;
            channel.last_event = Some(event);
            channel.timer.take()
        };
        if let Some(id) = previous_timer {
            this.scheduler.clear_timeout(id);
        }

        let weak = Rc::downgrade(this);
        let timer = this.scheduler.set_timeout(
            this.config.debounce(kind),
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Self::on_timer_expired(&inner, kind);
                }
            }),
        );
        this.state.borrow_mut().channels[kind.index()].timer = Some(timer);
    }

    fn on_timer_expired(this: &Rc<Self>, kind: GestureKind) {
        let (event, generation) = {
            let mut state = this.state.borrow_mut();
            let channel = &mut state.channels[kind.index()];
            channel.timer = None;
            match channel.last_event {
                Some(event) => (event, channel.generation),
                None => return,
            }
        };

        let weak: Weak<Self> = Rc::downgrade(this);
        this.handler.post(
            this.config.target,
            &this.config.command,
            Some(json!({ "x": event.x, "y": event.y })),
            Some(Box::new(move |reply: Reply| {
                if let Some(inner) = weak.upgrade() {
                    inner.on_lookup_reply(kind, generation, event, reply);
                }
            })),
            None,
        );
    }

    fn on_lookup_reply(
        &self,
        kind: GestureKind,
        generation: u64,
        event: PointerEvent,
        reply: Reply,
    ) {
        let consumer = {
            let state = self.state.borrow();
            let channel = &state.channels[kind.index()];
            if channel.generation != generation {
                tracing::trace!(?kind, "discarding lookup for superseded gesture");
                return;
            }
            channel.consumer.clone()
        };
        let Some(consumer) = consumer else {
            return;
        };
        if let Some(error) = reply.error {
            tracing::debug!(?kind, %error, "element lookup failed");
            return;
        }
        let target = reply
            .message
            .and_then(|value| serde_json::from_value::<ResolvedTarget>(value).ok());
        match target {
            Some(target) => consumer(GestureResolution { event, target }),
            None => tracing::debug!(?kind, "element lookup reply had no target"),
        }
    }
}
