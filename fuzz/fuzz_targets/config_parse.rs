#![no_main]

use backstop_core::config::EngineConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    // Anything that validates must also yield a recovery plan.
    if let Ok(config) = EngineConfig::from_toml_str(raw) {
        assert!(config.plan().is_ok());
    }
});
