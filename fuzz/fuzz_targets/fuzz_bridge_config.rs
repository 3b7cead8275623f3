#![no_main]

//! Fuzz harness for bridge config parsing and validation.

use insights::config::BridgeConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = BridgeConfig::from_json_str(input) {
        assert!(config.validate().is_ok());
    }
});
