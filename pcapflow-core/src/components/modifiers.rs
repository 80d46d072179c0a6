//! Input decompression and output compression.

use std::io::{self, Read, Write};

use flate2::write::GzEncoder;

use crate::error::{CloseErrors, Result};
use crate::io::{Compression, DecompressReader};
use crate::pipeline::{Closer, InputModifier, OutputModifier, SinkWriter};
use crate::stream::StreamHandle;

/// Decompresses every stream, either with a fixed codec or by sniffing the
/// leading magic bytes.
#[derive(Debug, Clone, Copy)]
pub struct Decompress {
    /// `None` detects per stream.
    compression: Option<Compression>,
}

impl Decompress {
    pub fn gzip() -> Self {
        Self {
            compression: Some(Compression::Gzip),
        }
    }

    #[cfg(feature = "compress-zstd")]
    pub fn zstd() -> Self {
        Self {
            compression: Some(Compression::Zstd),
        }
    }

    pub fn detect() -> Self {
        Self { compression: None }
    }
}

impl InputModifier for Decompress {
    fn wrap(&self, stream: StreamHandle) -> Result<(StreamHandle, Option<Closer>)> {
        let (meta, reader) = stream.into_parts();
        let reader = LazyDecoder {
            pending: Some(reader),
            compression: self.compression,
            active: None,
        };
        Ok((StreamHandle::new(meta, reader), None))
    }
}

/// Builds the decoder on first read; wrapping happens on an async task
/// where the stream must not be read.
struct LazyDecoder {
    pending: Option<Box<dyn Read + Send>>,
    compression: Option<Compression>,
    active: Option<Box<dyn Read + Send>>,
}

impl Read for LazyDecoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(source) = self.pending.take() {
            let decoder: Box<dyn Read + Send> = match self.compression {
                Some(compression) => Box::new(DecompressReader::new(source, compression)?),
                None => Box::new(DecompressReader::detect(source)?),
            };
            self.active = Some(decoder);
        }
        match self.active.as_mut() {
            Some(reader) => reader.read(buf),
            None => Ok(0),
        }
    }
}

/// Gzip-compresses everything written to the sink.
#[derive(Debug, Clone, Copy)]
pub struct GzipModifier {
    level: u32,
}

impl GzipModifier {
    pub fn new(level: u32) -> Self {
        Self { level: level.min(9) }
    }
}

impl OutputModifier for GzipModifier {
    fn wrap(&self, inner: Box<dyn SinkWriter>) -> Result<Box<dyn SinkWriter>> {
        Ok(Box::new(GzipWriter {
            encoder: GzEncoder::new(inner, flate2::Compression::new(self.level)),
        }))
    }
}

struct GzipWriter {
    encoder: GzEncoder<Box<dyn SinkWriter>>,
}

impl Write for GzipWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

impl SinkWriter for GzipWriter {
    fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors> {
        let mut errors = CloseErrors::new();
        let mut encoder = self.encoder;
        errors.push("gzip", encoder.try_finish());
        // finish() cannot fail after try_finish() succeeded; on failure the
        // inner writer still needs closing
        match encoder.finish() {
            Ok(inner) => errors.extend(inner.close()),
            Err(e) => errors.push("gzip", Err(e)),
        }
        errors.into_result()
    }
}

/// Zstandard-compresses everything written to the sink.
#[cfg(feature = "compress-zstd")]
#[derive(Debug, Clone, Copy)]
pub struct ZstdModifier {
    level: i32,
}

#[cfg(feature = "compress-zstd")]
impl ZstdModifier {
    pub fn new(level: i32) -> Self {
        Self { level }
    }
}

#[cfg(feature = "compress-zstd")]
impl OutputModifier for ZstdModifier {
    fn wrap(&self, inner: Box<dyn SinkWriter>) -> Result<Box<dyn SinkWriter>> {
        let encoder = zstd::stream::write::Encoder::new(inner, self.level)?;
        Ok(Box::new(ZstdWriter { encoder }))
    }
}

#[cfg(feature = "compress-zstd")]
struct ZstdWriter {
    encoder: zstd::stream::write::Encoder<'static, Box<dyn SinkWriter>>,
}

#[cfg(feature = "compress-zstd")]
impl Write for ZstdWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.encoder.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.encoder.flush()
    }
}

#[cfg(feature = "compress-zstd")]
impl SinkWriter for ZstdWriter {
    fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors> {
        let mut errors = CloseErrors::new();
        match self.encoder.finish() {
            Ok(inner) => errors.extend(inner.close()),
            // The encoder owns the inner writer, which is dropped unclosed
            Err(e) => errors.push("zstd", Err(e)),
        }
        errors.into_result()
    }
}
