//! Readable byte streams handed from sources to the pipeline.
//!
//! The tracker side of a stream is an in-memory pipe: the reassembler pushes
//! contiguous chunks into a [`PipeWriter`] and the input format pulls them
//! out of the paired [`PipeReader`]. At most [`PIPE_DEPTH`] chunks are
//! queued; beyond that the writer blocks until the reader catches up, so both
//! ends run on blocking threads. Dropping the writer is end-of-stream.

use std::io::{self, Read};

use bytes::{Buf, Bytes};
use tokio::sync::mpsc;

use super::StreamMeta;

/// Chunks a pipe holds before its writer blocks.
pub const PIPE_DEPTH: usize = 256;

/// Create a connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(PIPE_DEPTH);
    (
        PipeWriter { tx },
        PipeReader {
            rx,
            current: Bytes::new(),
        },
    )
}

/// Write side of a [`pipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<Bytes>,
}

impl PipeWriter {
    /// Queue a chunk for the reader, blocking while the pipe is full.
    ///
    /// Returns `false` once the reader has been dropped. Panics if called
    /// from inside an async task.
    pub fn write(&self, chunk: Bytes) -> bool {
        if chunk.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx.blocking_send(chunk).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if PipeWriter::write(self, Bytes::copy_from_slice(buf)) {
            Ok(buf.len())
        } else {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "stream reader dropped"))
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Blocking read side of a [`pipe`].
///
/// Must not be read from inside an async task; the pipeline reads it from
/// `spawn_blocking` threads.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while !self.current.has_remaining() {
            match self.rx.blocking_recv() {
                Some(chunk) => self.current = chunk,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

/// A readable byte stream plus the metadata describing where it came from.
///
/// Ownership moves from the source to the input modifiers to the input
/// format; dropping the handle closes the stream.
pub struct StreamHandle {
    meta: StreamMeta,
    reader: Box<dyn Read + Send>,
}

impl StreamHandle {
    pub fn new(meta: StreamMeta, reader: impl Read + Send + 'static) -> Self {
        Self {
            meta,
            reader: Box::new(reader),
        }
    }

    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    pub fn into_parts(self) -> (StreamMeta, Box<dyn Read + Send>) {
        (self.meta, self.reader)
    }
}

impl Read for StreamHandle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle").field("meta", &self.meta).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::Direction;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    // Test 1: Chunks are read back in order and EOF follows writer drop
    #[test]
    fn test_pipe_reads_chunks_then_eof() {
        let (writer, mut reader) = pipe();
        assert!(writer.write(Bytes::from_static(b"hello ")));
        assert!(writer.write(Bytes::from_static(b"world")));
        drop(writer);

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello world");
    }

    // Test 2: Small reads split a chunk
    #[test]
    fn test_pipe_partial_reads() {
        let (writer, mut reader) = pipe();
        writer.write(Bytes::from_static(b"abcdef"));

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    // Test 3: Writer notices a dropped reader
    #[test]
    fn test_pipe_reader_dropped() {
        let (writer, reader) = pipe();
        drop(reader);
        assert!(!writer.write(Bytes::from_static(b"x")));
        assert!(writer.is_closed());
    }

    // Test 4: A full pipe blocks the writer until the reader takes a chunk
    #[test]
    fn test_pipe_backpressure() {
        let (writer, mut reader) = pipe();
        for _ in 0..PIPE_DEPTH {
            assert!(writer.write(Bytes::from_static(b"x")));
        }

        let written = Arc::new(AtomicBool::new(false));
        let flag = written.clone();
        let blocked = std::thread::spawn(move || {
            assert!(writer.write(Bytes::from_static(b"y")));
            flag.store(true, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(50));
        assert!(!written.load(Ordering::SeqCst));

        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        blocked.join().unwrap();
        assert!(written.load(Ordering::SeqCst));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert_eq!(rest.len(), PIPE_DEPTH);
        assert_eq!(rest.last(), Some(&b'y'));
    }

    // Test 5: Handle carries metadata through into_parts
    #[test]
    fn test_stream_handle_parts() {
        let meta = StreamMeta::new(3, Direction::Down, "10.0.0.2:80", "10.0.0.1:5000");
        let handle = StreamHandle::new(meta.clone(), io::Cursor::new(b"data".to_vec()));
        assert_eq!(handle.meta(), &meta);

        let (parts_meta, mut reader) = handle.into_parts();
        assert_eq!(parts_meta.to_string(), "#3 down 10.0.0.2:80->10.0.0.1:5000");
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"data");
    }
}
