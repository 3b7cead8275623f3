#![no_main]

//! Fuzz harness for inbound window message parsing.
//!
//! Any string a page script posts reaches `Marshaller::parse_message`, and
//! anything it accepts reaches the handler's dispatch path.

use std::rc::Rc;

use insights::messaging::transport::WindowNetwork;
use insights::messaging::{Marshaller, MessageHandler, WindowRef};
use libfuzzer_sys::fuzz_target;

const MAX_INPUT_BYTES: usize = 128 * 1024;

fuzz_target!(|data: &[u8]| {
    if data.len() > MAX_INPUT_BYTES {
        return;
    }
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    let marshaller = Marshaller::new("app id", "app version");
    if let Some(envelope) = marshaller.parse_message(input) {
        assert!(!marshaller.serialize(&envelope).is_empty());
    }

    let network = WindowNetwork::new();
    let top = WindowRef::new(1);
    let handler = MessageHandler::new(
        Rc::new(network.transport(top)),
        Marshaller::new("app id", "app version"),
    );
    handler.initialize();
    handler.add_subscriber("cmd", |_, _, responder| {
        responder.respond(None);
        Ok(())
    });
    network.inject(WindowRef::new(2), top, input);
    network.run_until_idle();
});
