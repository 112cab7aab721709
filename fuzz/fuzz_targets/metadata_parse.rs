#![no_main]

use backstop_core::artifact::ArtifactMetadata;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(metadata) = serde_json::from_slice::<ArtifactMetadata>(data) else {
        return;
    };
    let declared = metadata.component;
    if let Ok(artifact) = metadata.into_artifact(None, None) {
        assert_eq!(artifact.component, declared);
        assert!(artifact.location_primary.is_none());
    }
});
