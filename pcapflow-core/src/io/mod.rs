//! Byte-level I/O helpers: decompression and object storage.

mod cloud;
mod decompress;

pub use cloud::{put_object, CloudLocation};
pub use decompress::{peek, Compression, DecompressReader, Peeked, MAGIC_LEN};
