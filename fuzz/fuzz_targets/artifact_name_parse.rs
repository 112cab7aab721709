#![no_main]

use backstop_core::artifact::{artifact_name, parse_artifact_name};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(parsed) = parse_artifact_name(raw) else {
        return;
    };
    // A parsed name without a suffix must render back to itself.
    if parsed.collision_suffix.is_none() {
        let rendered = artifact_name(parsed.component, parsed.created_at);
        let reparsed = parse_artifact_name(&rendered).expect("rendered name parses");
        assert_eq!(reparsed, parsed);
    }
});
