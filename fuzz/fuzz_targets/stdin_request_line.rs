#![no_main]

//! Feeds each fuzz input to the sample request-line targets through a pipe
//! rebound onto standard input.

use libfuzzer_sys::fuzz_target;
use pipein_core::{Harness, HarnessConfig};
use std::sync::{Mutex, OnceLock};

static HARNESS: OnceLock<Mutex<Harness>> = OnceLock::new();

fn harness() -> &'static Mutex<Harness> {
    HARNESS.get_or_init(|| {
        let mut config = HarnessConfig::default();
        config.target.entry_points = vec!["stdin-request-line".into(), "drain".into()];
        let harness = Harness::from_config(&config).expect("sample entry points are registered");
        Mutex::new(harness)
    })
}

fuzz_target!(|data: &[u8]| {
    let mut harness = harness().lock().unwrap_or_else(|e| e.into_inner());
    harness.run_one(data);
});
