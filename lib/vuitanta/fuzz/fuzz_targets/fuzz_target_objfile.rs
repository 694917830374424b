#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(object) = vuitanta::objfile::from_bytes(data) {
        let _ = vuitanta::objfile::to_bytes(&object);
    }
});
