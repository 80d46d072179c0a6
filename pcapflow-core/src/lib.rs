//! # pcapflow-core
//!
//! Turns packet captures into paired TCP byte streams, parses HTTP/1.x off
//! them, correlates requests with responses and moves the results through
//! composable pipelines.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pcapflow_core::prelude::*;
//!
//! # async fn run() -> pcapflow_core::Result<()> {
//! let config = ComponentConfig {
//!     capture: Some(CaptureInput::parse("capture.pcap")),
//!     ..Default::default()
//! };
//! let registry = builtin_registry(&config);
//! let flow = Parser::new(&registry).parse_flow("tcp|http", &["json|stdout"], FlowConfig::default())?;
//!
//! let (errors, _error_rx) = ErrorReporter::channel();
//! let stats = flow.run(CancellationToken::new(), errors).await;
//! println!("{} records", stats.records);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                        pcapflow-core                                |
//! +---------------------------------------------------------------------+
//! |  pcap/        - PCAP/PCAPNG replay, frame decoding down to TCP      |
//! |  stream/      - reassembly, connection pairing, HTTP/1.x parsing    |
//! |  cache/       - timed eviction cache                                |
//! |  correlate    - request/response pairing                            |
//! |  middleware   - external message-rewrite process                    |
//! |  pipeline/    - flows, registry and the pipeline description parser |
//! |  components/  - builtin sources, formats, modifiers and sinks       |
//! |  io/          - compression and object storage                      |
//! |  error        - error types                                         |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Crate Features
//!
//! - `default` - Zstd compression enabled
//! - `compress-zstd` - Zstd input and output compression
//! - `gcs` - Google Cloud Storage sink
//! - `s3` - S3 (and S3-compatible) sink

pub mod cache;
pub mod components;
pub mod correlate;
pub mod error;
pub mod io;
pub mod message;
pub mod middleware;
pub mod pcap;
pub mod pipeline;
pub mod prelude;
pub mod stream;

pub use cache::{CacheStats, EvictionCache, Evictions};
pub use components::{builtin_registry, CaptureInput, ComponentConfig};
pub use correlate::{Correlator, CorrelatorStats};
pub use error::{CloseErrors, Error, HttpError, MiddlewareError, PcapError, PipelineError, Result};
pub use message::{Exchange, Message, MessageMeta, Record, Request, Response};
pub use pcap::{PcapReader, RawPacket};
pub use pipeline::{ErrorReporter, Flow, FlowConfig, FlowStats, Parser, Registry};
pub use stream::{Assembler, ConnectionTracker, Direction, StreamHandle, StreamMeta};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
