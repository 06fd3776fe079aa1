#![no_main]

use armature_core::Model;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Deserializing arbitrary JSON should never panic
    let _ = serde_json::from_str::<Model>(data);
});
