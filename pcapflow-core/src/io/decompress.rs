//! Transparent decompression of capture files and streams.
//!
//! A source is sniffed by its leading magic bytes, which are replayed in
//! front of the rest of it, so callers never lose data to detection.

#[cfg(feature = "compress-zstd")]
use std::io::BufReader;
use std::fmt;
use std::io::{self, Chain, Cursor, Read};

use flate2::read::MultiGzDecoder;

/// Bytes needed to recognise every supported format.
pub const MAGIC_LEN: usize = 4;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
#[cfg(feature = "compress-zstd")]
const ZSTD_MAGIC: [u8; 4] = [0x28, 0xb5, 0x2f, 0xfd];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
    #[cfg(feature = "compress-zstd")]
    Zstd,
}

impl Compression {
    /// Anything unrecognised, including a short head, is plain.
    pub fn from_magic(head: &[u8]) -> Self {
        if head.starts_with(&GZIP_MAGIC) {
            return Compression::Gzip;
        }
        #[cfg(feature = "compress-zstd")]
        if head.starts_with(&ZSTD_MAGIC) {
            return Compression::Zstd;
        }
        Compression::None
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Compression::None => "none",
            Compression::Gzip => "gzip",
            #[cfg(feature = "compress-zstd")]
            Compression::Zstd => "zstd",
        };
        f.write_str(name)
    }
}

/// A reader with its first bytes already consumed and replayed in front.
pub type Peeked<R> = Chain<Cursor<Vec<u8>>, R>;

/// Read up to `len` leading bytes from `source` without losing them.
///
/// Returns the bytes read (fewer at end of stream) and a reader that yields
/// the whole original stream.
pub fn peek<R: Read>(source: R, len: usize) -> io::Result<(Vec<u8>, Peeked<R>)> {
    let mut head = Vec::with_capacity(len);
    let mut source = source.take(len as u64);
    source.read_to_end(&mut head)?;
    let replay = Cursor::new(head.clone()).chain(source.into_inner());
    Ok((head, replay))
}

/// Decodes whichever format its source is in.
pub enum DecompressReader<R: Read> {
    Plain(R),
    /// Concatenated gzip members are read through.
    Gzip(MultiGzDecoder<R>),
    #[cfg(feature = "compress-zstd")]
    Zstd(zstd::Decoder<'static, BufReader<R>>),
}

impl<R: Read> DecompressReader<R> {
    pub fn new(source: R, compression: Compression) -> io::Result<Self> {
        Ok(match compression {
            Compression::None => DecompressReader::Plain(source),
            Compression::Gzip => DecompressReader::Gzip(MultiGzDecoder::new(source)),
            #[cfg(feature = "compress-zstd")]
            Compression::Zstd => DecompressReader::Zstd(zstd::Decoder::new(source)?),
        })
    }

    pub fn compression(&self) -> Compression {
        match self {
            DecompressReader::Plain(_) => Compression::None,
            DecompressReader::Gzip(_) => Compression::Gzip,
            #[cfg(feature = "compress-zstd")]
            DecompressReader::Zstd(_) => Compression::Zstd,
        }
    }
}

impl<R: Read> DecompressReader<Peeked<R>> {
    /// Sniff the compression of `source` and decode it.
    pub fn detect(source: R) -> io::Result<Self> {
        let (head, replay) = peek(source, MAGIC_LEN)?;
        Self::new(replay, Compression::from_magic(&head))
    }
}

impl<R: Read> Read for DecompressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            DecompressReader::Plain(inner) => inner.read(buf),
            DecompressReader::Gzip(inner) => inner.read(buf),
            #[cfg(feature = "compress-zstd")]
            DecompressReader::Zstd(inner) => inner.read(buf),
        }
    }
}
