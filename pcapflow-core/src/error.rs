//! Error types for pcapflow-core.
//!
//! This module provides structured error types for all pcapflow-core operations:
//!
//! - [`enum@Error`] - Main error enum that wraps all error types
//! - [`PcapError`] - Errors from capture file reading
//! - [`HttpError`] - Errors from HTTP stream parsing
//! - [`PipelineError`] - Errors from flow construction and execution
//! - [`MiddlewareError`] - Errors from the external rewrite process
//!
//! All errors implement `std::error::Error` and can be converted to `anyhow::Error`.

use std::fmt;

use thiserror::Error;

use crate::pipeline::ComponentKind;

/// Main error type for pcapflow-core operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Error reading or parsing a capture file
    #[error("PCAP error: {0}")]
    Pcap(#[from] PcapError),

    /// Error parsing HTTP from a reassembled stream
    #[error("HTTP parse error: {0}")]
    Http(#[from] HttpError),

    /// Error building or running a flow
    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Error talking to the middleware process
    #[error("Middleware error: {0}")]
    Middleware(#[from] MiddlewareError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to capture file reading.
#[derive(Error, Debug)]
pub enum PcapError {
    /// File not found
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    /// Invalid PCAP format
    #[error("Invalid PCAP format: {reason}")]
    InvalidFormat { reason: String },
}

/// Errors related to HTTP stream parsing.
#[derive(Error, Debug)]
pub enum HttpError {
    /// Stream ended in the middle of a message
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Bytes are not a valid HTTP/1.x message
    #[error("malformed message: {reason}")]
    Malformed { reason: String },

    /// Header block exceeded the configured limit
    #[error("header block exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },

    /// Underlying stream read failed
    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors related to flow construction and execution.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Empty pipeline description
    #[error("empty pipeline description")]
    EmptyLine,

    /// Description has fewer than two tokens
    #[error("pipeline '{line}' needs at least two components")]
    TooFewTokens { line: String },

    /// Flow was given no outputs
    #[error("flow needs at least one output")]
    NoOutputs,

    /// Token is not registered
    #[error("unknown {kind} '{token}'")]
    UnknownComponent { kind: ComponentKind, token: String },

    /// Constructor for a registered token failed
    #[error("failed to build {kind} '{token}': {reason}")]
    Construct {
        kind: ComponentKind,
        token: String,
        reason: String,
    },

    /// An input modifier could not wrap a stream
    #[error("modifier '{modifier}' failed to wrap stream {stream}: {reason}")]
    Wrap {
        modifier: String,
        stream: String,
        reason: String,
    },

    /// Record written after the output stopped accepting records
    #[error("output '{output}' is closed")]
    OutputClosed { output: String },

    /// One or more writers failed to close
    #[error(transparent)]
    Close(#[from] CloseErrors),
}

/// Errors related to the middleware process.
#[derive(Error, Debug)]
pub enum MiddlewareError {
    /// Command could not be started
    #[error("failed to start '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command string was empty
    #[error("middleware command is empty")]
    EmptyCommand,

    /// Process closed its output
    #[error("process exited")]
    Exited,

    /// Process answered with something that is not a message
    #[error("malformed reply: {reason}")]
    Malformed { reason: String },

    /// Message could not be encoded for the process
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// Pipe I/O failed
    #[error("pipe error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors collected while closing a chain of writers.
///
/// Closing continues past failures so every layer gets a chance to release
/// its resources; the failures are reported together afterwards.
#[derive(Debug, Default)]
pub struct CloseErrors {
    errors: Vec<String>,
}

impl CloseErrors {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of closing one layer.
    pub fn push<E: fmt::Display>(&mut self, layer: &str, result: std::result::Result<(), E>) {
        if let Err(e) = result {
            self.errors.push(format!("{layer}: {e}"));
        }
    }

    /// Merge failures reported by an inner layer.
    pub fn extend(&mut self, result: std::result::Result<(), CloseErrors>) {
        if let Err(inner) = result {
            self.errors.extend(inner.errors);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn messages(&self) -> &[String] {
        &self.errors
    }

    /// `Ok` when nothing failed.
    pub fn into_result(self) -> std::result::Result<(), CloseErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for CloseErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} close error(s): {}", self.errors.len(), self.errors.join("; "))
    }
}

impl std::error::Error for CloseErrors {}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_errors_collects_every_failure() {
        let mut errors = CloseErrors::new();
        errors.push::<std::io::Error>("gzip", Ok(()));
        errors.push("gzip", Err(std::io::Error::other("disk full")));
        errors.push("file", Err(std::io::Error::other("bad fd")));

        assert_eq!(errors.len(), 2);
        let err = errors.into_result().unwrap_err();
        assert_eq!(err.to_string(), "2 close error(s): gzip: disk full; file: bad fd");
    }

    #[test]
    fn test_close_errors_extend_flattens() {
        let mut inner = CloseErrors::new();
        inner.push("sink", Err("timeout"));

        let mut outer = CloseErrors::new();
        outer.extend(inner.into_result());
        outer.extend(Ok(()));
        assert_eq!(outer.messages(), &["sink: timeout".to_string()]);
    }

    #[test]
    fn test_unknown_component_names_token_and_kind() {
        let err = Error::from(PipelineError::UnknownComponent {
            kind: ComponentKind::Sink,
            token: "gcs".into(),
        });
        assert_eq!(err.to_string(), "Pipeline error: unknown sink 'gcs'");
    }
}
