//! Stream protocol parsers.

mod http;

pub use http::{HttpStreamParser, DEFAULT_HEADER_LIMIT};
