//! Pipeline engine.
//!
//! A [`Flow`] joins one [`Input`] to one or more [`Output`]s:
//!
//! ```text
//! Source -> InputModifier* -> InputFormat ==records==> OutputFormat -> OutputModifier* -> Sink
//!                                              \=====> OutputFormat -> OutputModifier* -> Sink
//! ```
//!
//! Components are looked up by name in a [`Registry`] and wired from short
//! `|`-separated descriptions by the [`Parser`], e.g. `tcp|http` and
//! `json|gzip|stdout`.
//!
//! Byte streams and writers are blocking `Read`/`Write` values driven on
//! blocking threads; everything else runs on the Tokio runtime and talks
//! through bounded queues.

mod dsl;
mod flow;
mod input;
mod output;
mod registry;

use std::fmt;
use std::io::{self, Write};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{CloseErrors, Error, Result};
use crate::message::Record;
use crate::stream::StreamHandle;

pub use dsl::{Parser, SEPARATOR};
pub use flow::{Flow, FlowConfig, FlowStats};
pub use input::Input;
pub use output::Output;
pub use registry::Registry;

/// Capacity of the record queue between an input and the flow.
pub const RECORD_QUEUE: usize = 1024;

/// The registries a token can be looked up in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ComponentKind {
    Source,
    InputModifier,
    InputFormat,
    OutputFormat,
    OutputModifier,
    Sink,
}

impl ComponentKind {
    pub const ALL: [ComponentKind; 6] = [
        ComponentKind::Source,
        ComponentKind::InputModifier,
        ComponentKind::InputFormat,
        ComponentKind::OutputFormat,
        ComponentKind::OutputModifier,
        ComponentKind::Sink,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Source => "source",
            ComponentKind::InputModifier => "input modifier",
            ComponentKind::InputFormat => "input format",
            ComponentKind::OutputFormat => "output format",
            ComponentKind::OutputModifier => "output modifier",
            ComponentKind::Sink => "sink",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared channel for errors that must not stop the pipeline.
///
/// Per-stream parse failures, wrap failures, middleware failures and close
/// failures all end up here.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::UnboundedSender<Error>,
}

impl ErrorReporter {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Error>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn report(&self, error: impl Into<Error>) {
        let error = error.into();
        if let Err(mpsc::error::SendError(error)) = self.tx.send(error) {
            warn!(%error, "error reported after the error channel closed");
        }
    }
}

/// Everything an input format needs while it runs.
#[derive(Debug, Clone)]
pub struct InputContext {
    /// Input scope: stop accepting streams.
    pub cancel: CancellationToken,
    /// Output scope: fired once the flow has finished draining.
    pub teardown: CancellationToken,
    pub records: mpsc::Sender<Record>,
    pub errors: ErrorReporter,
}

/// Deferred cleanup produced by an input modifier.
pub type Closer = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// Producer of raw byte streams.
#[async_trait]
pub trait Source: Send + Sync {
    /// Emit streams on `streams` until the source is exhausted or `cancel`
    /// fires.
    async fn run(&self, cancel: CancellationToken, streams: mpsc::Sender<StreamHandle>) -> Result<()>;
}

/// Wraps a stream, e.g. to decompress it.
pub trait InputModifier: Send + Sync {
    fn wrap(&self, stream: StreamHandle) -> Result<(StreamHandle, Option<Closer>)>;
}

/// Turns streams into records.
pub trait InputFormat: Send + Sync {
    /// Start any shared machinery and return the per-stream decoder.
    fn start(&self, ctx: &InputContext) -> Result<Arc<dyn StreamDecoder>>;
}

/// Per-stream half of an [`InputFormat`].
pub trait StreamDecoder: Send + Sync {
    /// Consume one stream to its end. Runs on a blocking thread.
    fn decode(&self, stream: StreamHandle) -> Result<()>;
}

/// Serializes records onto a writer.
pub trait OutputFormat: Send {
    /// Write records until the queue closes. Runs on a blocking thread.
    fn write_records(
        &mut self,
        records: &mut mpsc::Receiver<Arc<Record>>,
        out: &mut dyn Write,
    ) -> io::Result<()>;
}

/// A writer that must be closed explicitly.
pub trait SinkWriter: Write + Send {
    /// Flush and release this layer and every layer beneath it.
    fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors>;
}

/// Wraps the writer below it, e.g. to compress.
pub trait OutputModifier: Send + Sync {
    fn wrap(&self, inner: Box<dyn SinkWriter>) -> Result<Box<dyn SinkWriter>>;
}
