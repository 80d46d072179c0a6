//! HTTP/1.x parser over a reassembled byte stream, using httparse for the
//! start line and headers.
//!
//! It supports:
//! - HTTP/1.0 and HTTP/1.1 requests and responses
//! - Chunked transfer encoding (decoded)
//! - Content-Length based bodies
//! - Close-delimited response bodies
//! - Keep-alive connections with multiple messages per stream
//!
//! Interim 1xx responses other than 101 are skipped.

use std::io::{self, Read};

use bytes::{Buf, BytesMut};
use httparse::{Status, EMPTY_HEADER};

use crate::error::HttpError;
use crate::message::{Header, Message, MessageMeta, Request, Response};

/// Maximum number of headers to parse per message.
const MAX_HEADERS: usize = 100;

/// Default cap on the size of a header block.
pub const DEFAULT_HEADER_LIMIT: usize = 64 * 1024;

const READ_CHUNK: usize = 8 * 1024;

enum StartLine {
    Request { method: String, uri: String },
    Status { code: u16, reason: String },
}

struct Head {
    start: StartLine,
    version: u8,
    headers: Vec<Header>,
    /// Length of the start line and header block including the blank line.
    len: usize,
}

impl Head {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .map(|v| v.to_ascii_lowercase().contains("chunked"))
            .unwrap_or(false)
    }

    fn content_length(&self) -> Result<Option<usize>, HttpError> {
        match self.header("content-length") {
            Some(v) => v
                .trim()
                .parse::<usize>()
                .map(Some)
                .map_err(|_| HttpError::Malformed {
                    reason: format!("invalid Content-Length '{v}'"),
                }),
            None => Ok(None),
        }
    }

    fn is_bodiless(&self) -> bool {
        matches!(self.start, StartLine::Status { code, .. } if (100..200).contains(&code) || code == 204 || code == 304)
    }

    fn is_interim(&self) -> bool {
        matches!(self.start, StartLine::Status { code, .. } if (100..200).contains(&code) && code != 101)
    }
}

/// Pulls HTTP/1.x messages off one direction of a connection.
pub struct HttpStreamParser<R> {
    reader: R,
    buf: BytesMut,
    header_limit: usize,
}

impl<R: Read> HttpStreamParser<R> {
    pub fn new(reader: R) -> Self {
        Self::with_header_limit(reader, DEFAULT_HEADER_LIMIT)
    }

    pub fn with_header_limit(reader: R, header_limit: usize) -> Self {
        Self {
            reader,
            buf: BytesMut::with_capacity(READ_CHUNK),
            header_limit,
        }
    }

    /// Parse the next message, blocking until one is complete.
    ///
    /// Returns `Ok(None)` when the stream ends cleanly between messages and
    /// [`HttpError::UnexpectedEof`] when it ends inside one.
    pub fn next_message(
        &mut self,
        connection_id: u64,
        exchange_id: u64,
    ) -> Result<Option<Message>, HttpError> {
        loop {
            let Some(head) = self.read_head()? else {
                return Ok(None);
            };
            if head.is_interim() {
                self.buf.advance(head.len);
                continue;
            }

            let body = self.read_body(&head)?;
            let meta = MessageMeta::new(connection_id, exchange_id);
            let message = match head.start {
                StartLine::Request { method, uri } => Message::Request(Request {
                    meta,
                    method,
                    uri,
                    version: head.version,
                    headers: head.headers,
                    body,
                }),
                StartLine::Status { code, reason } => Message::Response(Response {
                    meta,
                    status: code,
                    reason,
                    version: head.version,
                    headers: head.headers,
                    body,
                }),
            };
            return Ok(Some(message));
        }
    }

    /// Read more bytes into the buffer. Returns `false` at end of stream.
    fn fill(&mut self) -> io::Result<bool> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.reader.read(&mut chunk) {
                Ok(0) => return Ok(false),
                Ok(n) => {
                    self.buf.extend_from_slice(&chunk[..n]);
                    return Ok(true);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn fill_to(&mut self, len: usize) -> Result<(), HttpError> {
        while self.buf.len() < len {
            if !self.fill()? {
                return Err(HttpError::UnexpectedEof);
            }
        }
        Ok(())
    }

    /// Drop stray line endings between pipelined messages.
    fn skip_blank_lines(&mut self) {
        loop {
            if self.buf.starts_with(b"\r\n") {
                self.buf.advance(2);
            } else if self.buf.starts_with(b"\n") {
                self.buf.advance(1);
            } else {
                break;
            }
        }
    }

    fn read_head(&mut self) -> Result<Option<Head>, HttpError> {
        loop {
            self.skip_blank_lines();
            if self.buf.is_empty() {
                if !self.fill()? {
                    return Ok(None);
                }
                continue;
            }

            // Not enough bytes yet to tell a status line from a request line
            let undecided = self.buf.len() < 5 && b"HTTP/".starts_with(&self.buf[..]);
            if !undecided {
                if let Some(head) = parse_head(&self.buf, self.header_limit)? {
                    return Ok(Some(head));
                }
            }

            if !self.fill()? {
                return Err(HttpError::UnexpectedEof);
            }
        }
    }

    fn read_body(&mut self, head: &Head) -> Result<Vec<u8>, HttpError> {
        let start = head.len;

        if head.is_bodiless() {
            self.buf.advance(start);
            return Ok(Vec::new());
        }

        if head.is_chunked() {
            loop {
                if let Some((body, used)) = decode_chunked(&self.buf[start..])? {
                    self.buf.advance(start + used);
                    return Ok(body);
                }
                if !self.fill()? {
                    return Err(HttpError::UnexpectedEof);
                }
            }
        }

        if let Some(len) = head.content_length()? {
            let end = start.checked_add(len).ok_or_else(|| HttpError::Malformed {
                reason: format!("content length {len} out of range"),
            })?;
            self.fill_to(end)?;
            let body = self.buf[start..end].to_vec();
            self.buf.advance(end);
            return Ok(body);
        }

        if matches!(head.start, StartLine::Status { .. }) {
            // Close-delimited: the body runs to the end of the stream
            while self.fill()? {}
            let body = self.buf[start..].to_vec();
            self.buf.clear();
            return Ok(body);
        }

        self.buf.advance(start);
        Ok(Vec::new())
    }
}

fn owned_headers(headers: &[httparse::Header]) -> Vec<Header> {
    headers
        .iter()
        .filter(|h| !h.name.is_empty())
        .map(|h| Header::new(h.name, String::from_utf8_lossy(h.value)))
        .collect()
}

/// Parse a start line and headers. `Ok(None)` means more bytes are needed.
fn parse_head(data: &[u8], limit: usize) -> Result<Option<Head>, HttpError> {
    let mut headers = [EMPTY_HEADER; MAX_HEADERS];

    let parsed = if data.starts_with(b"HTTP/") {
        let mut resp = httparse::Response::new(&mut headers);
        match resp.parse(data) {
            Ok(Status::Complete(len)) => Some(Head {
                start: StartLine::Status {
                    code: resp.code.unwrap_or_default(),
                    reason: resp.reason.unwrap_or_default().to_string(),
                },
                version: resp.version.unwrap_or(1),
                headers: owned_headers(resp.headers),
                len,
            }),
            Ok(Status::Partial) => None,
            Err(e) => {
                return Err(HttpError::Malformed {
                    reason: format!("bad response head: {e}"),
                })
            }
        }
    } else {
        let mut req = httparse::Request::new(&mut headers);
        match req.parse(data) {
            Ok(Status::Complete(len)) => Some(Head {
                start: StartLine::Request {
                    method: req.method.unwrap_or_default().to_string(),
                    uri: req.path.unwrap_or_default().to_string(),
                },
                version: req.version.unwrap_or(1),
                headers: owned_headers(req.headers),
                len,
            }),
            Ok(Status::Partial) => None,
            Err(e) => {
                return Err(HttpError::Malformed {
                    reason: format!("bad request head: {e}"),
                })
            }
        }
    };

    match parsed {
        Some(head) if head.len > limit => Err(HttpError::HeadersTooLarge { limit }),
        None if data.len() > limit => Err(HttpError::HeadersTooLarge { limit }),
        other => Ok(other),
    }
}

/// Decode a chunked body.
///
/// Returns the decoded body and the number of bytes it occupied, or `None`
/// when the body is not complete yet.
fn decode_chunked(data: &[u8]) -> Result<Option<(Vec<u8>, usize)>, HttpError> {
    let mut body = Vec::new();
    let mut pos = 0;

    loop {
        // Find chunk size line ending
        let Some(line_end) = data[pos..]
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|p| pos + p)
        else {
            return Ok(None);
        };

        let size_line = std::str::from_utf8(&data[pos..line_end]).map_err(|_| malformed_chunk())?;
        // Handle chunk extensions (anything after semicolon)
        let size_part = size_line.split(';').next().unwrap_or(size_line);
        let chunk_size = usize::from_str_radix(size_part.trim(), 16).map_err(|_| malformed_chunk())?;

        pos = line_end + 2;

        if chunk_size == 0 {
            // Final chunk - need trailing \r\n (and optional trailers)
            if data.len() >= pos + 2 && &data[pos..pos + 2] == b"\r\n" {
                return Ok(Some((body, pos + 2)));
            }
            if let Some(end) = data[pos..].windows(4).position(|w| w == b"\r\n\r\n") {
                return Ok(Some((body, pos + end + 4)));
            }
            return Ok(None);
        }

        // Need chunk data + trailing \r\n
        let Some((chunk_end, next)) = pos
            .checked_add(chunk_size)
            .and_then(|end| Some((end, end.checked_add(2)?)))
        else {
            return Err(malformed_chunk());
        };
        if data.len() < next {
            return Ok(None);
        }
        if &data[chunk_end..next] != b"\r\n" {
            return Err(malformed_chunk());
        }

        body.extend_from_slice(&data[pos..chunk_end]);
        pos = next;
    }
}

fn malformed_chunk() -> HttpError {
    HttpError::Malformed {
        reason: "invalid chunk framing".to_string(),
    }
}
