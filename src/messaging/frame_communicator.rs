//! Requests across the frame tree with liveness checks.
//!
//! Before each request a [`FrameCommunicator`] pings the target window and
//! gives it [`PING_TIMEOUT`] to answer, so a frame that never loaded a handler
//! fails fast instead of leaving a pending entry behind. Disposal cascades:
//! each window forwards [`DISPOSE_COMMAND`] to its child frames and answers its
//! parent once the children settled or [`DISPOSE_TIMEOUT`] elapsed.

use std::cell::Cell;
use std::fmt;
use std::future::Future;
use std::pin::{Pin, pin};
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{self, Either};
use futures::task::{LocalSpawn, LocalSpawnExt as _};
use serde_json::Value;
use thiserror::Error;

use super::timer::{Scheduler, TimerId};
use super::transport::WindowRef;
use super::{HandlerError, MessageHandler, PendingReply, Reply, SubscriberError};

pub const PING_COMMAND: &str = "insights.ping";
pub const DISPOSE_COMMAND: &str = "insights.dispose";

pub const PING_TIMEOUT: Duration = Duration::from_millis(500);
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(100);
pub const DISPOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// An `<iframe>` child of the current document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildFrame {
    /// `None` while the frame has no content window.
    pub window: Option<WindowRef>,
    /// Raw `sandbox` attribute, if the element carries one.
    pub sandbox: Option<String>,
}

impl ChildFrame {
    #[must_use]
    pub const fn new(window: WindowRef) -> Self {
        Self {
            window: Some(window),
            sandbox: None,
        }
    }

    #[must_use]
    pub fn sandboxed(mut self, tokens: impl Into<String>) -> Self {
        self.sandbox = Some(tokens.into());
        self
    }

    /// Unsandboxed frames, and sandboxed ones granted `allow-scripts`.
    #[must_use]
    pub fn supports_scripting(&self) -> bool {
        self.sandbox.as_deref().is_none_or(|tokens| {
            tokens
                .split_ascii_whitespace()
                .any(|token| token.eq_ignore_ascii_case("allow-scripts"))
        })
    }
}

/// The child frames of the document a communicator lives in.
pub trait FrameTree {
    fn child_frames(&self) -> Vec<ChildFrame>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameTarget {
    Window(WindowRef),
    Frame(ChildFrame),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameRequest {
    pub target: FrameTarget,
    pub command: String,
    pub message: Option<Value>,
}

impl FrameRequest {
    #[must_use]
    pub fn for_window(window: WindowRef, command: impl Into<String>) -> Self {
        Self {
            target: FrameTarget::Window(window),
            command: command.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn for_frame(frame: ChildFrame, command: impl Into<String>) -> Self {
        Self {
            target: FrameTarget::Frame(frame),
            command: command.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn with_message(mut self, message: Value) -> Self {
        self.message = Some(message);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTimeouts {
    pub ping: Duration,
    pub response: Duration,
    pub dispose: Duration,
}

impl Default for FrameTimeouts {
    fn default() -> Self {
        Self {
            ping: PING_TIMEOUT,
            response: RESPONSE_TIMEOUT,
            dispose: DISPOSE_TIMEOUT,
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame has no content window")]
    NoContentWindow,
    #[error("cannot connect to sandboxed frame {window}")]
    Sandboxed { window: WindowRef },
    #[error("cannot connect to {window}: no ping reply within {after:?}")]
    Unreachable { window: WindowRef, after: Duration },
    #[error("{command} to {window} got no reply within {after:?}")]
    Timeout {
        command: String,
        window: WindowRef,
        after: Duration,
    },
    #[error("{frames} frame requests did not settle within {after:?}")]
    FanOutTimeout { frames: usize, after: Duration },
    #[error(transparent)]
    Handler(#[from] HandlerError),
}

/// Per-request outcomes of a fan-out, in request order.
pub type Settled = Vec<Result<Option<Value>, FrameError>>;

struct Inner {
    handler: MessageHandler,
    scheduler: Rc<dyn Scheduler>,
    frames: Rc<dyn FrameTree>,
    spawner: Rc<dyn LocalSpawn>,
    timeouts: Cell<FrameTimeouts>,
    initialized: Cell<bool>,
}

/// Frame-aware layer over a [`MessageHandler`].
#[derive(Clone)]
pub struct FrameCommunicator {
    inner: Rc<Inner>,
}

impl fmt::Debug for FrameCommunicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCommunicator")
            .field("window", &self.inner.handler.window())
            .field("timeouts", &self.inner.timeouts.get())
            .field("initialized", &self.inner.initialized.get())
            .finish_non_exhaustive()
    }
}

impl FrameCommunicator {
    /// `spawner` runs the dispose cascade a parent window asks for.
    #[must_use]
    pub fn new(
        handler: MessageHandler,
        scheduler: Rc<dyn Scheduler>,
        frames: Rc<dyn FrameTree>,
        spawner: Rc<dyn LocalSpawn>,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                handler,
                scheduler,
                frames,
                spawner,
                timeouts: Cell::new(FrameTimeouts::default()),
                initialized: Cell::new(false),
            }),
        }
    }

    #[must_use]
    pub fn with_timeouts(self, timeouts: FrameTimeouts) -> Self {
        self.inner.timeouts.set(timeouts);
        self
    }

    #[must_use]
    pub fn handler(&self) -> &MessageHandler {
        &self.inner.handler
    }

    /// Initializes the handler and subscribes the ping and dispose commands.
    /// A second call is a no-op until [`dispose`](Self::dispose) completes.
    pub fn initialize(&self) {
        if self.inner.initialized.replace(true) {
            return;
        }
        let handler = &self.inner.handler;
        handler.initialize();

        // A ping carrying a payload is a late acknowledgement whose request
        // already timed out. Answering it would ping-pong between windows.
        handler.add_subscriber(PING_COMMAND, |envelope, _, responder| {
            if envelope.message.is_none() {
                responder.respond(Some(Value::Bool(true)));
            }
            Ok(())
        });

        let weak = Rc::downgrade(&self.inner);
        handler.add_subscriber(DISPOSE_COMMAND, move |_, source, responder| {
            let Some(inner) = weak.upgrade() else {
                return Ok(());
            };
            tracing::debug!(%source, "dispose requested by parent window");
            let communicator = FrameCommunicator { inner };
            let spawner = Rc::clone(&communicator.inner.spawner);
            spawner
                .spawn_local(async move {
                    if let Err(err) = communicator.dispose().await {
                        tracing::warn!(error = %err, "child frames did not settle before dispose");
                    }
                    responder.respond(None);
                })
                .map_err(|err| SubscriberError::from_error("SpawnError", err))
        });
    }

    /// Pings the target, then sends the request. Fails without posting when
    /// the target has no window or is a sandboxed frame without scripts.
    pub async fn send_message(&self, request: FrameRequest) -> Result<Option<Value>, FrameError> {
        let FrameRequest {
            target,
            command,
            message,
        } = request;
        let window = match target {
            FrameTarget::Window(window) => window,
            FrameTarget::Frame(frame) => {
                let window = frame.window.ok_or(FrameError::NoContentWindow)?;
                if !frame.supports_scripting() {
                    tracing::debug!(%window, "cannot connect to sandboxed frame");
                    return Err(FrameError::Sandboxed { window });
                }
                window
            }
        };
        let timeouts = self.inner.timeouts.get();

        let ping = self.track(self.inner.handler.request(window, PING_COMMAND, None));
        match self.within(timeouts.ping, ping).await {
            Some(reply) => {
                reply?;
            }
            None => {
                tracing::warn!(%window, "no ping reply; frame is unreachable");
                return Err(FrameError::Unreachable {
                    window,
                    after: timeouts.ping,
                });
            }
        }

        let response = self.track(self.inner.handler.request(window, &command, message));
        let request_id = response.reply.message_id().to_string();
        match self.within(timeouts.response, response).await {
            Some(reply) => Ok(reply?.into_result(&request_id)?),
            None => Err(FrameError::Timeout {
                command,
                window,
                after: timeouts.response,
            }),
        }
    }

    /// Sends every request concurrently and waits for all of them to settle,
    /// or for `timeout` to elapse, whichever comes first.
    pub async fn execute_request_for_all_frames(
        &self,
        requests: Vec<FrameRequest>,
        timeout: Duration,
    ) -> Result<Settled, FrameError> {
        let frames = requests.len();
        let all = future::join_all(requests.into_iter().map(|request| self.send_message(request)));
        self.within(timeout, all)
            .await
            .ok_or(FrameError::FanOutTimeout {
                frames,
                after: timeout,
            })
    }

    /// Forwards [`DISPOSE_COMMAND`] to every child frame, then disposes the
    /// handler. The handler is disposed even when children do not settle in
    /// time; that case is reported as [`FrameError::FanOutTimeout`].
    pub async fn dispose(&self) -> Result<Settled, FrameError> {
        let requests: Vec<FrameRequest> = self
            .inner
            .frames
            .child_frames()
            .into_iter()
            .map(|frame| FrameRequest::for_frame(frame, DISPOSE_COMMAND))
            .collect();
        let children = requests.len();
        let settled = self
            .execute_request_for_all_frames(requests, self.inner.timeouts.get().dispose)
            .await;

        self.inner.handler.dispose();
        self.inner.initialized.set(false);
        tracing::info!(
            window = %self.inner.handler.window(),
            children,
            settled = settled.is_ok(),
            "frame tree disposed"
        );
        settled
    }

    fn track(&self, reply: PendingReply) -> InFlight {
        InFlight {
            handler: self.inner.handler.clone(),
            reply,
        }
    }

    async fn within<F: Future>(&self, after: Duration, work: F) -> Option<F::Output> {
        let work = pin!(work);
        let deadline = Deadline::new(Rc::clone(&self.inner.scheduler), after);
        match future::select(work, deadline).await {
            Either::Left((output, _)) => Some(output),
            Either::Right(((), _)) => None,
        }
    }
}

/// A request whose pending entry is released once nobody waits for it.
struct InFlight {
    handler: MessageHandler,
    reply: PendingReply,
}

impl Future for InFlight {
    type Output = Result<Reply, HandlerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.reply).poll(cx)
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if self.handler.cancel_pending(self.reply.message_id()) {
            tracing::debug!(message_id = self.reply.message_id(), "abandoned request released");
        }
    }
}

/// Resolves when `after` elapses on the scheduler. Dropping it clears the timer.
struct Deadline {
    scheduler: Rc<dyn Scheduler>,
    timer: TimerId,
    elapsed: oneshot::Receiver<()>,
}

impl Deadline {
    fn new(scheduler: Rc<dyn Scheduler>, after: Duration) -> Self {
        let (tx, elapsed) = oneshot::channel();
        let timer = scheduler.set_timeout(
            after,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        Self {
            scheduler,
            timer,
            elapsed,
        }
    }
}

impl Future for Deadline {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        // A scheduler that drops the timer without firing it counts as elapsed.
        Pin::new(&mut self.elapsed).poll(cx).map(|_| ())
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        self.scheduler.clear_timeout(self.timer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Marshaller;
    use crate::messaging::timer::ManualScheduler;
    use crate::messaging::transport::WindowNetwork;
    use futures::executor::LocalPool;
    use serde_json::json;
    use std::cell::RefCell;

    const TOP: WindowRef = WindowRef::new(1);
    const FRAME: WindowRef = WindowRef::new(2);
    const NESTED: WindowRef = WindowRef::new(3);

    struct Frames(Vec<ChildFrame>);

    impl FrameTree for Frames {
        fn child_frames(&self) -> Vec<ChildFrame> {
            self.0.clone()
        }
    }

    struct Tree {
        network: WindowNetwork,
        scheduler: ManualScheduler,
        pool: LocalPool,
    }

    impl Tree {
        fn new() -> Self {
            Self {
                network: WindowNetwork::new(),
                scheduler: ManualScheduler::new(),
                pool: LocalPool::new(),
            }
        }

        fn window(&self, window: WindowRef, children: Vec<ChildFrame>) -> FrameCommunicator {
            let handler = MessageHandler::new(
                Rc::new(self.network.transport(window)),
                Marshaller::new("insights", "1.0.0"),
            );
            let communicator = FrameCommunicator::new(
                handler,
                Rc::new(self.scheduler.clone()),
                Rc::new(Frames(children)),
                Rc::new(self.pool.spawner()),
            );
            communicator.initialize();
            communicator
        }

        fn spawn<T: 'static>(
            &self,
            work: impl Future<Output = T> + 'static,
        ) -> Rc<RefCell<Option<T>>> {
            let slot = Rc::new(RefCell::new(None));
            let sink = Rc::clone(&slot);
            self.pool
                .spawner()
                .spawn_local(async move {
                    let output = work.await;
                    *sink.borrow_mut() = Some(output);
                })
                .expect("pool accepts tasks");
            slot
        }

        /// Runs tasks and delivers messages until neither makes progress.
        fn settle(&mut self) {
            loop {
                self.pool.run_until_stalled();
                if self.network.run_until_idle() == 0 {
                    break;
                }
            }
        }

        fn advance(&mut self, by: Duration) {
            self.scheduler.advance(by);
            self.settle();
        }
    }

    fn command_of(raw: &str) -> Option<String> {
        let value: Value = serde_json::from_str(raw).ok()?;
        value["command"].as_str().map(str::to_string)
    }

    #[test]
    fn request_follows_a_successful_ping() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, vec![ChildFrame::new(FRAME)]);
        let frame = tree.window(FRAME, Vec::new());
        frame.handler().add_subscriber("insights.scan", |envelope, _, responder| {
            responder.respond(Some(json!({ "echo": envelope.message.clone() })));
            Ok(())
        });

        let sender = top.clone();
        let result = tree.spawn(async move {
            sender
                .send_message(
                    FrameRequest::for_frame(ChildFrame::new(FRAME), "insights.scan")
                        .with_message(json!(7)),
                )
                .await
        });
        tree.settle();

        let value = result.borrow_mut().take().expect("settled").expect("reply");
        assert_eq!(value, Some(json!({ "echo": 7 })));
        let commands: Vec<String> = tree
            .network
            .posted()
            .iter()
            .filter(|posted| posted.source == TOP)
            .filter_map(|posted| command_of(&posted.data))
            .collect();
        assert_eq!(commands, ["insights.ping", "insights.scan"]);
        assert_eq!(top.handler().pending_request_count(), 0);
        assert_eq!(tree.scheduler.pending_timers(), 0);
    }

    #[test]
    fn unresponsive_window_fails_after_ping_timeout() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, Vec::new());

        let sender = top.clone();
        let result = tree.spawn(async move {
            sender
                .send_message(FrameRequest::for_window(FRAME, "insights.scan"))
                .await
        });
        tree.settle();
        assert_eq!(top.handler().pending_request_count(), 1);

        tree.advance(PING_TIMEOUT - Duration::from_millis(1));
        assert!(result.borrow().is_none(), "still inside the ping window");

        tree.advance(Duration::from_millis(1));
        let err = result.borrow_mut().take().expect("settled").expect_err("unreachable");
        assert!(matches!(err, FrameError::Unreachable { window, .. } if window == FRAME));
        assert_eq!(top.handler().pending_request_count(), 0, "ping entry released");
        assert_eq!(tree.network.posted().len(), 1, "the request itself is never sent");
    }

    #[test]
    fn silent_subscriber_times_out_and_releases_entry() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, Vec::new());
        let frame = tree.window(FRAME, Vec::new());
        frame.handler().add_subscriber("insights.scan", |_, _, _| Ok(()));

        let sender = top.clone().with_timeouts(FrameTimeouts {
            response: Duration::from_secs(2),
            ..FrameTimeouts::default()
        });
        let result = tree.spawn(async move {
            sender
                .send_message(FrameRequest::for_window(FRAME, "insights.scan"))
                .await
        });
        tree.settle();
        assert_eq!(top.handler().pending_request_count(), 1);

        tree.advance(Duration::from_secs(2));
        let err = result.borrow_mut().take().expect("settled").expect_err("timeout");
        assert!(matches!(err, FrameError::Timeout { ref command, .. } if command == "insights.scan"));
        assert_eq!(top.handler().pending_request_count(), 0);
    }

    #[test]
    fn remote_failure_surfaces_as_handler_error() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, Vec::new());
        let frame = tree.window(FRAME, Vec::new());
        frame.handler().add_subscriber("insights.scan", |_, _, _| {
            Err(SubscriberError::new("TypeError", "no document"))
        });

        let sender = top.clone();
        let result = tree.spawn(async move {
            sender
                .send_message(FrameRequest::for_window(FRAME, "insights.scan"))
                .await
        });
        tree.settle();
        let err = result.borrow_mut().take().expect("settled").expect_err("remote");
        assert!(matches!(err, FrameError::Handler(HandlerError::Remote { .. })));
    }

    #[test]
    fn frames_without_scripting_are_rejected_before_posting() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, Vec::new());
        let sandboxed = ChildFrame::new(FRAME).sandboxed("allow-forms");
        let detached = ChildFrame {
            window: None,
            sandbox: None,
        };

        let sender = top.clone();
        let result = tree.spawn(async move {
            (
                sender
                    .send_message(FrameRequest::for_frame(sandboxed, "insights.scan"))
                    .await,
                sender
                    .send_message(FrameRequest::for_frame(detached, "insights.scan"))
                    .await,
            )
        });
        tree.settle();
        let (sandboxed, detached) = result.borrow_mut().take().expect("settled");
        assert!(matches!(sandboxed, Err(FrameError::Sandboxed { window }) if window == FRAME));
        assert!(matches!(detached, Err(FrameError::NoContentWindow)));
        assert!(tree.network.posted().is_empty());
    }

    #[test]
    fn sandbox_tokens_are_matched_case_insensitively() {
        assert!(ChildFrame::new(FRAME).supports_scripting());
        assert!(ChildFrame::new(FRAME).sandboxed("allow-forms ALLOW-SCRIPTS").supports_scripting());
        assert!(!ChildFrame::new(FRAME).sandboxed("").supports_scripting());
        assert!(!ChildFrame::new(FRAME).sandboxed("allow-scripts-x").supports_scripting());
    }

    #[test]
    fn fan_out_settles_each_frame_independently() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, Vec::new());
        let frame = tree.window(FRAME, Vec::new());
        frame.handler().add_subscriber("insights.scan", |_, _, responder| {
            responder.respond(Some(json!("done")));
            Ok(())
        });

        let sender = top.clone();
        let result = tree.spawn(async move {
            sender
                .execute_request_for_all_frames(
                    vec![
                        FrameRequest::for_window(FRAME, "insights.scan"),
                        FrameRequest::for_window(NESTED, "insights.scan"),
                    ],
                    Duration::from_secs(5),
                )
                .await
        });
        tree.settle();
        tree.advance(PING_TIMEOUT);

        let settled = result.borrow_mut().take().expect("settled").expect("within deadline");
        assert_eq!(settled.len(), 2);
        assert_eq!(settled[0].as_ref().ok(), Some(&Some(json!("done"))));
        assert!(matches!(settled[1], Err(FrameError::Unreachable { window, .. }) if window == NESTED));
    }

    #[test]
    fn fan_out_deadline_abandons_stragglers() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, Vec::new());
        let frame = tree.window(FRAME, Vec::new());
        frame.handler().add_subscriber("insights.scan", |_, _, _| Ok(()));

        let sender = top.clone();
        let result = tree.spawn(async move {
            sender
                .execute_request_for_all_frames(
                    vec![FrameRequest::for_window(FRAME, "insights.scan")],
                    Duration::from_secs(1),
                )
                .await
        });
        tree.settle();
        tree.advance(Duration::from_secs(1));

        let err = result.borrow_mut().take().expect("settled").expect_err("deadline");
        assert!(matches!(err, FrameError::FanOutTimeout { frames: 1, .. }));
        assert_eq!(top.handler().pending_request_count(), 0);
        assert_eq!(tree.scheduler.pending_timers(), 0);
    }

    #[test]
    fn dispose_cascades_down_the_frame_tree() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, vec![ChildFrame::new(FRAME)]);
        let frame = tree.window(FRAME, vec![ChildFrame::new(NESTED)]);
        let nested = tree.window(NESTED, Vec::new());

        let disposer = top.clone();
        let result = tree.spawn(async move { disposer.dispose().await });
        tree.settle();

        let settled = result.borrow_mut().take().expect("settled").expect("in time");
        assert_eq!(settled.len(), 1);
        assert!(settled[0].is_ok());
        for communicator in [&top, &frame, &nested] {
            assert!(!communicator.handler().is_initialized());
        }
    }

    #[test]
    fn dispose_completes_when_a_child_never_answers() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, vec![ChildFrame::new(FRAME)]);

        let disposer = top.clone();
        let result = tree.spawn(async move { disposer.dispose().await });
        tree.settle();
        assert!(top.handler().is_initialized());

        tree.advance(PING_TIMEOUT);
        let settled = result.borrow_mut().take().expect("settled").expect("in time");
        assert!(matches!(settled[0], Err(FrameError::Unreachable { .. })));
        assert!(!top.handler().is_initialized());
    }

    #[test]
    fn late_ping_acknowledgement_is_not_answered() {
        let mut tree = Tree::new();
        let top = tree.window(TOP, Vec::new());
        let marshaller = top.handler().marshaller();
        let late = marshaller.create_message(PING_COMMAND, Some(Value::Bool(true)), None);
        tree.network.inject(FRAME, TOP, marshaller.serialize(&late));
        tree.settle();
        assert_eq!(tree.network.posted().len(), 1, "no reply to an acknowledgement");
    }
}
