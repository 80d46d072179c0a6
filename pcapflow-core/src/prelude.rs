//! Convenient re-exports for common usage.
//!
//! ```rust,no_run
//! use pcapflow_core::prelude::*;
//!
//! let registry = builtin_registry(&ComponentConfig::default());
//! let parser = Parser::new(&registry);
//! ```

// Pipeline
pub use crate::components::{builtin_registry, CaptureInput, ComponentConfig};
pub use crate::pipeline::{
    ComponentKind, ErrorReporter, Flow, FlowConfig, FlowStats, InputFormat, InputModifier, OutputFormat,
    OutputModifier, Parser, Registry, SinkWriter, Source, StreamDecoder,
};

// Data
pub use crate::message::{Exchange, Message, Record, Request, Response};
pub use crate::stream::{Direction, StreamHandle, StreamMeta};

// Cancellation
pub use tokio_util::sync::CancellationToken;

// Error types
pub use crate::error::{Error, Result};
