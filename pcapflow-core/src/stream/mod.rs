//! TCP stream reassembly and pairing.
//!
//! This module turns decoded TCP segments into paired, readable byte
//! streams, one per direction of every logical connection.
//!
//! ## Components
//!
//! - [`StreamBuffer`] - Reassembles one direction's segments into ordered bytes
//! - [`Assembler`] - Owns a buffer per half-duplex flow and feeds the tracker
//! - [`ConnectionTracker`] - Pairs half-duplex flows into logical connections
//! - [`StreamHandle`] - Readable stream plus connection/direction metadata
//! - [`HttpStreamParser`] - Pulls HTTP/1.x messages off a stream
//!
//! ## Example
//!
//! ```rust,no_run
//! use pcapflow_core::stream::{Assembler, ConnectionTracker};
//!
//! let (tracker, _streams) = ConnectionTracker::new();
//! let mut assembler = Assembler::new(tracker.clone());
//!
//! // Feed decoded segments...
//! // assembler.process(&segment);
//! assembler.flush_all();
//! tracker.prune();
//! tracker.close();
//! ```

mod assembler;
mod connection;
mod context;
mod handle;
pub mod parsers;
mod reassembly;

pub use assembler::{Assembler, AssemblerStats, TcpSegment};
pub use connection::{ConnectionTracker, LogicalConnection, StreamWriter};
pub use context::{flow_key, Direction, NetFlow, StreamMeta, TransportFlow};
pub use handle::{pipe, PipeReader, PipeWriter, StreamHandle, PIPE_DEPTH};
pub use parsers::HttpStreamParser;
pub use reassembly::{SequenceGap, StreamBuffer, StreamStats};
