//! Fuzz target for the HTTP/1.x stream parser.
//!
//! Exercises request and status line parsing, header blocks, chunked and
//! content-length bodies, and pipelined messages on one stream.

#![no_main]

use libfuzzer_sys::fuzz_target;
use pcapflow_core::stream::HttpStreamParser;
use std::io::Cursor;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    // First byte picks a small header limit so the limit path is reached too
    let limit = 64 + usize::from(data[0]) * 16;
    let mut parser = HttpStreamParser::with_header_limit(Cursor::new(&data[1..]), limit);

    let mut exchange_id = 0;
    while let Ok(Some(_message)) = parser.next_message(1, exchange_id) {
        exchange_id += 1;
    }
});
