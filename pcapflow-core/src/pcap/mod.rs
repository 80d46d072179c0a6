//! Capture file replay.
//!
//! The main types are:
//! - [`PcapReader`] - PCAP/PCAPNG reader with automatic compression handling
//! - [`RawPacket`] - One captured frame
//! - [`decode_tcp`] - Frame to [`TcpSegment`](crate::stream::TcpSegment) decoding

mod packet;
mod reader;

pub use packet::{decode_tcp, linktype};
pub use reader::{PcapFormat, PcapReader, RawPacket};

#[cfg(test)]
pub(crate) use packet::test_frames;
#[cfg(test)]
pub(crate) use reader::test_captures;
