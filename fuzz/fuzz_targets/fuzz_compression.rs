//! Fuzz target for compression detection and decompression.
//!
//! Tests format confusion and decompression bombs for supported formats:
//! - Gzip (0x1f, 0x8b)
//! - Zstd (0x28, 0xb5, 0x2f, 0xfd)

#![no_main]

use libfuzzer_sys::fuzz_target;
use pcapflow_core::io::DecompressReader;
use std::io::{Cursor, Read};

/// Maximum bytes to read during decompression to prevent bombs.
const MAX_DECOMPRESS_SIZE: u64 = 1024 * 1024; // 1MB

fuzz_target!(|data: &[u8]| {
    if let Ok(reader) = DecompressReader::detect(Cursor::new(data)) {
        let mut sink = Vec::new();
        let _ = reader.take(MAX_DECOMPRESS_SIZE).read_to_end(&mut sink);
    }
});
