//! Window message handler integration tests.
//!
//! Covers the handler from the perspective of windows exchanging envelopes
//! over a shared network:
//! - request/response correlation, including acknowledged replies
//! - error replies surfaced through `PendingReply`
//! - foreign traffic ignored
//! - relaying through an intermediate frame
//! - at-most-once callbacks, teardown and per-command isolation
//!
//! Run:
//! ```bash
//! cargo test --test message_handler
//! ```

mod common;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use common::{FRAME, NESTED, TOP, window_handler};
use futures::FutureExt as _;
use insights::messaging::envelope::MESSAGE_STABLE_SIGNATURE;
use insights::messaging::transport::WindowNetwork;
use insights::messaging::{HandlerError, Marshaller, Reply, SubscriberError};
use serde_json::json;

#[test]
fn request_resolves_with_subscriber_reply() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let frame = window_handler(&network, FRAME);
    frame.add_subscriber("insights.frameSize", |_, source, responder| {
        assert_eq!(source, TOP);
        responder.respond(Some(json!({ "width": 800, "height": 600 })));
        Ok(())
    });

    let pending = top.request(FRAME, "insights.frameSize", None);
    assert_eq!(top.pending_request_count(), 1);
    network.run_until_idle();

    let reply = pending
        .now_or_never()
        .expect("delivered")
        .expect("channel open");
    let message_id = reply.responder.message_id().to_string();
    assert_eq!(
        reply.into_result(&message_id).expect("no error"),
        Some(json!({ "width": 800, "height": 600 }))
    );
    assert_eq!(top.pending_request_count(), 0);
}

#[test]
fn acknowledged_reply_round_trip() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let frame = window_handler(&network, FRAME);
    let acks = Rc::new(RefCell::new(Vec::new()));

    let sink = Rc::clone(&acks);
    frame.add_subscriber("insights.scan", move |_, _, responder| {
        let sink = Rc::clone(&sink);
        responder.respond_and_await(
            Some(json!("scanned")),
            Box::new(move |ack: Reply| sink.borrow_mut().push(ack.message)),
        );
        Ok(())
    });

    top.post(
        FRAME,
        "insights.scan",
        None,
        Some(Box::new(|reply: Reply| {
            assert_eq!(reply.message, Some(json!("scanned")));
            reply.responder.respond(Some(json!("ack")));
        })),
        None,
    );
    network.run_until_idle();

    assert_eq!(acks.borrow().as_slice(), &[Some(json!("ack"))]);
    assert_eq!(top.pending_request_count(), 0);
    assert_eq!(frame.pending_request_count(), 0);
}

#[test]
fn subscriber_failure_surfaces_as_remote_error() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let frame = window_handler(&network, FRAME);
    frame.add_subscriber("insights.lookup", |_, _, _| {
        let cause = serde_json::from_str::<u32>("not a number")
            .map_err(|err| SubscriberError::from_error("SyntaxError", err))?;
        assert_eq!(cause, 0);
        Ok(())
    });

    let pending = top.request(FRAME, "insights.lookup", None);
    let request_id = pending.message_id().to_string();
    network.run_until_idle();

    let reply = pending
        .now_or_never()
        .expect("delivered")
        .expect("channel open");
    match reply.into_result(&request_id) {
        Err(HandlerError::Remote { request_id: id, error }) => {
            assert_eq!(id, request_id);
            assert_eq!(error.name, "SyntaxError");
            assert!(!error.message.is_empty());
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[test]
fn foreign_traffic_is_ignored() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let hits = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&hits);
    top.add_subscriber("cmd", move |_, _, _| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    let other_version = Marshaller::new("Accessibility Insights for Web", "1.9.0");
    let other_extension = Marshaller::new("Some Other Extension", "2.0.0");
    for marshaller in [&other_version, &other_extension] {
        let raw = marshaller.serialize(&marshaller.create_message("cmd", None, None));
        network.inject(FRAME, TOP, raw);
    }
    network.inject(FRAME, TOP, "hello from a page script");
    network.inject(
        FRAME,
        TOP,
        json!({ "command": "cmd", "messageStableSignature": MESSAGE_STABLE_SIGNATURE })
            .to_string(),
    );
    network.run_until_idle();
    assert_eq!(*hits.borrow(), 0);

    let ours = common::marshaller();
    network.inject(
        FRAME,
        TOP,
        ours.serialize(&ours.create_message("cmd", None, None)),
    );
    network.run_until_idle();
    assert_eq!(*hits.borrow(), 1);
}

#[test]
fn intermediate_frame_relays_to_nested_frame() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let frame = window_handler(&network, FRAME);
    let nested = window_handler(&network, NESTED);

    nested.add_subscriber("insights.findElementByPosition", |envelope, _, responder| {
        let x = envelope
            .message
            .as_ref()
            .and_then(|m| m["x"].as_f64())
            .unwrap_or_default();
        responder.respond(Some(json!({ "path": [format!("#nested-{x}")] })));
        Ok(())
    });

    let relay = frame.clone();
    frame.add_subscriber("insights.findElementByPosition", move |envelope, _, responder| {
        relay.post(
            NESTED,
            &envelope.command,
            envelope.message.clone(),
            Some(Box::new(move |reply: Reply| {
                let path = reply
                    .message
                    .as_ref()
                    .and_then(|m| m["path"].as_array().cloned())
                    .unwrap_or_default();
                let mut full = vec![json!("iframe#content")];
                full.extend(path);
                responder.respond(Some(json!({ "path": full })));
            })),
            None,
        );
        Ok(())
    });

    let pending = top.request(
        FRAME,
        "insights.findElementByPosition",
        Some(json!({ "x": 4.0, "y": 2.0 })),
    );
    network.run_until_idle();
    let reply = pending
        .now_or_never()
        .expect("delivered")
        .expect("channel open");
    assert_eq!(
        reply.message,
        Some(json!({ "path": ["iframe#content", "#nested-4"] }))
    );
}

#[test]
fn disposed_window_stops_receiving() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let frame = window_handler(&network, FRAME);
    let hits = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&hits);
    frame.add_subscriber("cmd", move |_, _, _| {
        *counter.borrow_mut() += 1;
        Ok(())
    });

    top.post(FRAME, "cmd", None, None, None);
    network.run_until_idle();
    frame.dispose();
    top.post(FRAME, "cmd", None, None, None);
    network.run_until_idle();

    assert_eq!(*hits.borrow(), 1);
    assert_eq!(network.posted().len(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════
// Delivery guarantees
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn duplicate_reply_fires_callback_once_then_reaches_subscriber() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let frame = window_handler(&network, FRAME);
    frame.add_subscriber("insights.scan", |_, _, responder| {
        responder.respond(Some(json!(1)));
        responder.respond(Some(json!(2)));
        Ok(())
    });

    let fallthrough = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&fallthrough);
    top.add_subscriber("insights.scan", move |envelope, source, _| {
        sink.borrow_mut().push((envelope.message.clone(), source));
        Ok(())
    });

    let callbacks = Rc::new(RefCell::new(Vec::new()));
    let calls = Rc::clone(&callbacks);
    let id = top.post(
        FRAME,
        "insights.scan",
        None,
        Some(Box::new(move |reply: Reply| calls.borrow_mut().push(reply.message))),
        None,
    );
    network.run_until_idle();

    assert_eq!(callbacks.borrow().as_slice(), &[Some(json!(1))]);
    assert_eq!(fallthrough.borrow().as_slice(), &[(Some(json!(2)), FRAME)]);
    assert!(!top.cancel_pending(&id), "entry removed before the callback ran");
}

#[test]
fn callback_registered_before_dispose_never_fires() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let frame = window_handler(&network, FRAME);
    frame.add_subscriber("insights.scan", |_, _, responder| {
        responder.respond(Some(json!("late")));
        Ok(())
    });

    let fired = Rc::new(Cell::new(false));
    let flag = Rc::clone(&fired);
    top.post(
        FRAME,
        "insights.scan",
        None,
        Some(Box::new(move |_: Reply| flag.set(true))),
        None,
    );
    top.dispose();
    assert_eq!(top.pending_request_count(), 0);

    // Re-attached before the reply lands, so the reply is actually delivered.
    top.initialize();
    network.run_until_idle();
    assert!(!fired.get());
    assert_eq!(network.posted().len(), 2);
}

#[test]
fn subscribers_only_see_their_own_command() {
    let network = WindowNetwork::new();
    let top = window_handler(&network, TOP);
    let frame = window_handler(&network, FRAME);

    let seen = Rc::new(RefCell::new(Vec::new()));
    for (command, label) in [("insights.draw", "draw"), ("insights.clear", "clear")] {
        let sink = Rc::clone(&seen);
        frame.add_subscriber(command, move |envelope, _, _| {
            sink.borrow_mut().push((label, envelope.command.clone()));
            Ok(())
        });
    }

    for command in ["insights.draw", "insights.clear", "insights.draw", "insights.other"] {
        top.post(FRAME, command, None, None, None);
    }
    network.run_until_idle();

    assert_eq!(
        seen.borrow().as_slice(),
        &[
            ("draw", "insights.draw".to_string()),
            ("clear", "insights.clear".to_string()),
            ("draw", "insights.draw".to_string()),
        ]
    );
}
