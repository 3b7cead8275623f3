//! Host-driven timer seam.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

pub trait Scheduler {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId;

    /// Cancels a timer. Unknown or already-fired ids are ignored.
    fn clear_timeout(&self, id: TimerId);
}

struct ScheduledTimer {
    due: Duration,
    callback: Box<dyn FnOnce()>,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    timers: BTreeMap<TimerId, ScheduledTimer>,
}

/// Deterministic [`Scheduler`] whose clock only moves when told to.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Rc<RefCell<ManualState>>,
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("ManualScheduler")
            .field("now", &state.now)
            .field("pending", &state.timers.len())
            .finish()
    }
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn now(&self) -> Duration {
        self.state.borrow().now
    }

    #[must_use]
    pub fn pending_timers(&self) -> usize {
        self.state.borrow().timers.len()
    }

    /// Moves the clock forward by `by`, firing every timer that falls due in
    /// deadline order (ties broken by creation order). Timers scheduled by a
    /// firing callback also fire if they fall inside the window.
    /// Returns the number of callbacks run.
    pub fn advance(&self, by: Duration) -> usize {
        let target = self.state.borrow().now + by;
        let mut fired = 0;
        while let Some(timer) = self.pop_due(target) {
            (timer.callback)();
            fired += 1;
        }
        self.state.borrow_mut().now = target;
        fired
    }

    fn pop_due(&self, target: Duration) -> Option<ScheduledTimer> {
        let mut state = self.state.borrow_mut();
        let id = state
            .timers
            .iter()
            .filter(|(_, timer)| timer.due <= target)
            .min_by_key(|(id, timer)| (timer.due, **id))
            .map(|(id, _)| *id)?;
        let timer = state.timers.remove(&id)?;
        state.now = timer.due;
        Some(timer)
    }
}

impl Scheduler for ManualScheduler {
    fn set_timeout(&self, delay: Duration, callback: Box<dyn FnOnce()>) -> TimerId {
        let mut state = self.state.borrow_mut();
        state.next_id += 1;
        let id = TimerId(state.next_id);
        let due = state.now + delay;
        state.timers.insert(id, ScheduledTimer { due, callback });
        id
    }

    fn clear_timeout(&self, id: TimerId) {
        let removed = self.state.borrow_mut().timers.remove(&id);
        drop(removed);
    }
}
