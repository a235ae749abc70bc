#![no_main]
use std::io::Cursor;

use libfuzzer_sys::fuzz_target;
use ppk_core::codec;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must come back as a typed error, never a panic.
    if let Ok(archive) = codec::read_archive(Cursor::new(data), "fuzz") {
        assert_eq!(
            archive.minimap.len(),
            archive
                .buffer
                .sample_count()
                .div_ceil(archive.minimap.window())
        );
        // Whatever loads must write back and load identically.
        let bytes = codec::to_bytes(&archive.buffer).expect("re-encode");
        let again = codec::read_archive(Cursor::new(bytes), "fuzz").expect("re-read");
        assert_eq!(again.buffer.sample_count(), archive.buffer.sample_count());
    }
    // The raw session decoder alone.
    let _ = codec::decode_session(data, "fuzz");
});
