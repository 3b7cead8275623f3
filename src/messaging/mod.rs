//! Cross-context window messaging.
//!
//! One [`MessageHandler`] runs per window. It posts envelopes through an
//! injected [`Transport`], correlates replies to pending requests by message
//! id, and dispatches everything else to the subscriber registered for the
//! envelope's command. A subscriber that fails gets its error marshalled back
//! to the sender instead of taking the handler down.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll};

use futures::channel::oneshot;
use serde_json::Value;
use thiserror::Error;

use crate::logging;

pub mod envelope;
pub mod frame_communicator;
pub mod frame_query;
pub mod timer;
pub mod transport;

pub use envelope::{ErrorContent, Marshaller, MessageEnvelope};
pub use frame_communicator::{FrameCommunicator, FrameError, FrameRequest};
pub use transport::{ListenerId, Transport, WindowRef};

/// Everything a reply delivers to the code awaiting it.
#[derive(Debug)]
pub struct Reply {
    pub message: Option<Value>,
    pub error: Option<ErrorContent>,
    pub source: WindowRef,
    pub responder: Responder,
}

pub type ResponseCallback = Box<dyn FnOnce(Reply)>;

/// Handles one inbound command.
///
/// Returning `Err` is the only supported way to report a fault: the error is
/// logged and marshalled back to the sender, and the handler keeps serving.
/// A panic is not caught. It unwinds through the transport listener and out
/// of whatever is delivering window messages.
pub type SubscriberCallback =
    Rc<dyn Fn(&MessageEnvelope, WindowRef, Responder) -> Result<(), SubscriberError>>;

enum PendingEntry {
    Callback(ResponseCallback),
    Channel(oneshot::Sender<Reply>),
}

#[derive(Default)]
struct HandlerState {
    listener: Option<ListenerId>,
    pending: HashMap<String, PendingEntry>,
    subscribers: HashMap<String, SubscriberCallback>,
}

struct Shared {
    transport: Rc<dyn Transport>,
    marshaller: Marshaller,
    state: RefCell<HandlerState>,
}

/// Per-window request/response and notification channel.
///
/// Cloning yields another handle to the same handler.
#[derive(Clone)]
pub struct MessageHandler {
    shared: Rc<Shared>,
}

impl fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.borrow();
        f.debug_struct("MessageHandler")
            .field("window", &self.shared.transport.window())
            .field("initialized", &state.listener.is_some())
            .field("pending", &state.pending.len())
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

impl MessageHandler {
    #[must_use]
    pub fn new(transport: Rc<dyn Transport>, marshaller: Marshaller) -> Self {
        Self {
            shared: Rc::new(Shared {
                transport,
                marshaller,
                state: RefCell::new(HandlerState::default()),
            }),
        }
    }

    #[must_use]
    pub fn window(&self) -> WindowRef {
        self.shared.transport.window()
    }

    #[must_use]
    pub fn marshaller(&self) -> &Marshaller {
        &self.shared.marshaller
    }

    /// Attaches the transport listener. Calling it again is a no-op.
    pub fn initialize(&self) {
        if self.is_initialized() {
            return;
        }
        let weak = Rc::downgrade(&self.shared);
        let listener_id = self
            .shared
            .transport
            .add_listener(Rc::new(move |raw: &str, source: WindowRef| {
                if let Some(shared) = weak.upgrade() {
                    MessageHandler { shared }.on_window_message(raw, source);
                }
            }));
        self.shared.state.borrow_mut().listener = Some(listener_id);
        tracing::info!(window = %self.window(), "message handler initialized");
    }

    /// Detaches the listener and drops every pending request without invoking
    /// it. Awaiting [`PendingReply`] futures resolve to
    /// [`HandlerError::ResponseChannelClosed`].
    pub fn dispose(&self) {
        let (listener, pending) = {
            let mut state = self.shared.state.borrow_mut();
            (state.listener.take(), std::mem::take(&mut state.pending))
        };
        if let Some(listener) = listener {
            self.shared.transport.remove_listener(listener);
            tracing::info!(
                window = %self.window(),
                dropped_pending = pending.len(),
                "message handler disposed"
            );
        }
        drop(pending);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.shared.state.borrow().listener.is_some()
    }

    /// Sends `command` to `target`. When `on_response` is given it is invoked
    /// at most once, with the first inbound envelope carrying the same id.
    /// Returns the message id used.
    pub fn post(
        &self,
        target: WindowRef,
        command: &str,
        payload: Option<Value>,
        on_response: Option<ResponseCallback>,
        message_id: Option<String>,
    ) -> String {
        let envelope = self
            .shared
            .marshaller
            .create_message(command, payload, message_id);
        if let Some(callback) = on_response {
            self.register_pending(&envelope.message_id, PendingEntry::Callback(callback));
        }
        self.transmit(target, &envelope);
        envelope.message_id
    }

    /// Future-based variant of [`post`](Self::post) with a response callback.
    pub fn request(
        &self,
        target: WindowRef,
        command: &str,
        payload: Option<Value>,
    ) -> PendingReply {
        let envelope = self.shared.marshaller.create_message(command, payload, None);
        let (tx, rx) = oneshot::channel();
        self.register_pending(&envelope.message_id, PendingEntry::Channel(tx));
        self.transmit(target, &envelope);
        PendingReply {
            message_id: envelope.message_id,
            receiver: rx,
        }
    }

    /// Drops the pending request for `message_id` without invoking it.
    pub fn cancel_pending(&self, message_id: &str) -> bool {
        let removed = self.shared.state.borrow_mut().pending.remove(message_id);
        removed.is_some()
    }

    /// Registers `callback` for `command`, replacing any previous subscriber.
    /// See [`SubscriberCallback`] for how a subscriber reports failure.
    pub fn add_subscriber<F>(&self, command: &str, callback: F)
    where
        F: Fn(&MessageEnvelope, WindowRef, Responder) -> Result<(), SubscriberError> + 'static,
    {
        let replaced = self
            .shared
            .state
            .borrow_mut()
            .subscribers
            .insert(command.to_string(), Rc::new(callback));
        if replaced.is_some() {
            tracing::debug!(command, "replaced existing subscriber");
        }
    }

    pub fn remove_subscriber(&self, command: &str) {
        let removed = self.shared.state.borrow_mut().subscribers.remove(command);
        drop(removed);
    }

    #[must_use]
    pub fn pending_request_count(&self) -> usize {
        self.shared.state.borrow().pending.len()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.state.borrow().subscribers.len()
    }

    fn register_pending(&self, message_id: &str, entry: PendingEntry) {
        let previous = self
            .shared
            .state
            .borrow_mut()
            .pending
            .insert(message_id.to_string(), entry);
        if previous.is_some() {
            tracing::debug!(message_id, "pending request superseded by reused id");
        }
    }

    fn transmit(&self, target: WindowRef, envelope: &MessageEnvelope) {
        let data = self.shared.marshaller.serialize(envelope);
        tracing::trace!(
            message_id = %envelope.message_id,
            command = %envelope.command,
            %target,
            "posting window message"
        );
        self.shared.transport.post_message(target, data);
    }

    fn responder(&self, target: WindowRef, command: &str, message_id: &str) -> Responder {
        Responder {
            handler: Rc::downgrade(&self.shared),
            target,
            command: command.to_string(),
            message_id: message_id.to_string(),
        }
    }

    fn on_window_message(&self, raw: &str, source: WindowRef) {
        let Some(envelope) = self.shared.marshaller.parse_message(raw) else {
            tracing::trace!(%source, "ignoring unrecognized window message");
            return;
        };
        let span = logging::message_span(&envelope.message_id, &envelope.command);
        let _entered = span.enter();

        let pending = self
            .shared
            .state
            .borrow_mut()
            .pending
            .remove(&envelope.message_id);
        let responder = self.responder(source, &envelope.command, &envelope.message_id);

        match pending {
            Some(PendingEntry::Callback(callback)) => callback(Reply {
                message: envelope.message,
                error: envelope.error,
                source,
                responder,
            }),
            Some(PendingEntry::Channel(sender)) => {
                let reply = Reply {
                    message: envelope.message,
                    error: envelope.error,
                    source,
                    responder,
                };
                if sender.send(reply).is_err() {
                    tracing::debug!("reply arrived after its receiver was dropped");
                }
            }
            None => self.dispatch_to_subscriber(&envelope, source, responder),
        }
    }

    fn dispatch_to_subscriber(
        &self,
        envelope: &MessageEnvelope,
        source: WindowRef,
        responder: Responder,
    ) {
        let subscriber = self
            .shared
            .state
            .borrow()
            .subscribers
            .get(&envelope.command)
            .cloned();
        let Some(subscriber) = subscriber else {
            tracing::debug!(%source, "no subscriber for command");
            return;
        };

        if let Err(err) = subscriber(envelope, source, responder.clone()) {
            tracing::warn!(%source, error = %err, "subscriber failed");
            if envelope.error.is_some() {
                // Answering an error with an error could bounce forever between
                // two windows whose subscribers both fail.
                return;
            }
            responder.respond_error(ErrorContent::from(&err));
        }
    }
}

/// Bound reply channel handed to subscribers and response callbacks. Every
/// send goes back to the original sender under the original message id.
#[derive(Clone)]
pub struct Responder {
    handler: Weak<Shared>,
    target: WindowRef,
    command: String,
    message_id: String,
}

impl fmt::Debug for Responder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Responder")
            .field("target", &self.target)
            .field("command", &self.command)
            .field("message_id", &self.message_id)
            .finish_non_exhaustive()
    }
}

impl Responder {
    #[must_use]
    pub fn target(&self) -> WindowRef {
        self.target
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn respond(&self, payload: Option<Value>) {
        self.send(payload, None);
    }

    /// Replies and registers `on_response` for an acknowledgement of the reply.
    pub fn respond_and_await(&self, payload: Option<Value>, on_response: ResponseCallback) {
        self.send(payload, Some(on_response));
    }

    pub fn respond_error(&self, error: ErrorContent) {
        let Some(shared) = self.handler.upgrade() else {
            tracing::debug!(message_id = %self.message_id, "handler gone; error reply dropped");
            return;
        };
        let handler = MessageHandler { shared };
        let envelope = handler.shared.marshaller.create_error_message(
            &self.command,
            error,
            Some(self.message_id.clone()),
        );
        handler.transmit(self.target, &envelope);
    }

    fn send(&self, payload: Option<Value>, on_response: Option<ResponseCallback>) {
        let Some(shared) = self.handler.upgrade() else {
            tracing::debug!(message_id = %self.message_id, "handler gone; reply dropped");
            return;
        };
        MessageHandler { shared }.post(
            self.target,
            &self.command,
            payload,
            on_response,
            Some(self.message_id.clone()),
        );
    }
}

/// Future returned by [`MessageHandler::request`].
#[derive(Debug)]
pub struct PendingReply {
    message_id: String,
    receiver: oneshot::Receiver<Reply>,
}

impl PendingReply {
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }
}

impl Future for PendingReply {
    type Output = Result<Reply, HandlerError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.receiver).poll(cx).map(|result| {
            result.map_err(|_| HandlerError::ResponseChannelClosed {
                request_id: self.message_id.clone(),
            })
        })
    }
}

/// Failure a subscriber reports back to the sender of the envelope it handled.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct SubscriberError {
    pub name: String,
    pub message: String,
    #[source]
    pub source: Option<Box<dyn std::error::Error + 'static>>,
}

impl SubscriberError {
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Wraps any error, keeping it as the source of the marshalled failure.
    #[must_use]
    pub fn from_error(name: impl Into<String>, err: impl std::error::Error + 'static) -> Self {
        Self {
            name: name.into(),
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<&SubscriberError> for ErrorContent {
    fn from(err: &SubscriberError) -> Self {
        ErrorContent {
            stack: ErrorContent::from_error(err.name.clone(), err).stack,
            name: err.name.clone(),
            message: err.message.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("response channel closed before request {request_id} completed")]
    ResponseChannelClosed { request_id: String },
    #[error("reply to request {request_id} carried an error: {error}")]
    Remote {
        request_id: String,
        error: ErrorContent,
    },
}

impl Reply {
    /// Converts an error-carrying reply into [`HandlerError::Remote`].
    pub fn into_result(self, request_id: &str) -> Result<Option<Value>, HandlerError> {
        match self.error {
            Some(error) => Err(HandlerError::Remote {
                request_id: request_id.to_string(),
                error,
            }),
            None => Ok(self.message),
        }
    }
}
