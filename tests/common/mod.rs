//! Shared test helpers for integration tests

use jitportal::config::JitConfig;
use jitportal::metainterp::MetaInterp;
use jitportal::portal::RecordingPortal;
use std::sync::Arc;

/// Harness with the small test thresholds and a recording observer
pub fn recording_jit() -> (MetaInterp, Arc<RecordingPortal>) {
    recording_jit_with(JitConfig::for_tests())
}

pub fn recording_jit_with(config: JitConfig) -> (MetaInterp, Arc<RecordingPortal>) {
    let recorder = Arc::new(RecordingPortal::new());
    let jit = MetaInterp::with_portal(config, recorder.clone());
    (jit, recorder)
}

/// Compiled loops as `(second green, first green, kind)`
#[allow(dead_code)]
pub fn loop_triples(recorder: &RecordingPortal) -> Vec<(i64, i64, &'static str)> {
    recorder
        .compiled_loops()
        .into_iter()
        .map(|(key, kind, _)| {
            (
                key.get_int(1).unwrap_or_default(),
                key.get_int(0).unwrap_or_default(),
                kind.as_str(),
            )
        })
        .collect()
}
