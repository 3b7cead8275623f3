#![no_main]

//! Fuzz harness for per-tab action messages.

use insights::tabs::{InterpreterMessage, TabContextRegistry};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = serde_json::from_slice::<InterpreterMessage>(data) else {
        return;
    };
    let mut registry = TabContextRegistry::new();
    registry.register(message.tab_id);
    let _ = registry.interpret(message);
});
