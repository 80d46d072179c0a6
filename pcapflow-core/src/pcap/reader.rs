//! PCAP/PCAPNG reader over any byte source.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, PcapBlockOwned, PcapNGReader};
use tracing::debug;

use crate::error::{Error, PcapError};
use crate::io::{peek, DecompressReader};

/// Buffer size for pcap_parser readers (256KB).
const BUFFER_SIZE: usize = 262144;

type Source = Box<dyn Read + Send>;

/// A captured frame with its link type.
#[derive(Debug, Clone)]
pub struct RawPacket {
    /// 1-based position in the capture
    pub frame_number: u64,
    /// Capture timestamp in microseconds since the epoch
    pub timestamp_us: i64,
    pub link_type: u16,
    pub data: Bytes,
}

/// Format of the capture, from its magic bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PcapFormat {
    /// Classic PCAP (little-endian, microseconds)
    LegacyLeMicro,
    /// Classic PCAP (big-endian, microseconds)
    LegacyBeMicro,
    /// Classic PCAP (little-endian, nanoseconds)
    LegacyLeNano,
    /// Classic PCAP (big-endian, nanoseconds)
    LegacyBeNano,
    /// PCAPNG format
    PcapNg,
}

impl PcapFormat {
    /// Detect PCAP format from magic bytes.
    pub fn detect(data: &[u8]) -> Result<Self, Error> {
        let Some(magic) = data.get(..4) else {
            return Err(Error::Pcap(PcapError::InvalidFormat {
                reason: "Data too small for PCAP magic".into(),
            }));
        };

        match u32::from_ne_bytes([magic[0], magic[1], magic[2], magic[3]]) {
            0xa1b2c3d4 => Ok(PcapFormat::LegacyLeMicro),
            0xd4c3b2a1 => Ok(PcapFormat::LegacyBeMicro),
            0xa1b23c4d => Ok(PcapFormat::LegacyLeNano),
            0x4d3cb2a1 => Ok(PcapFormat::LegacyBeNano),
            0x0a0d0d0a => Ok(PcapFormat::PcapNg),
            magic => Err(Error::Pcap(PcapError::InvalidFormat {
                reason: format!("Unknown PCAP magic: 0x{magic:08x}"),
            })),
        }
    }

    pub fn is_pcapng(&self) -> bool {
        matches!(self, PcapFormat::PcapNg)
    }

    fn is_nano(&self) -> bool {
        matches!(self, PcapFormat::LegacyLeNano | PcapFormat::LegacyBeNano)
    }
}

enum ReaderInner {
    Legacy(LegacyPcapReader<Source>),
    Ng(PcapNGReader<Source>),
}

/// Capture reader yielding [`RawPacket`]s.
///
/// Gzip and zstd compressed captures are decompressed transparently.
pub struct PcapReader {
    inner: ReaderInner,
    format: PcapFormat,
    frame_number: u64,
    link_type: u16,
}

impl PcapReader {
    /// Open a capture file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::Pcap(PcapError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                Error::Io(e)
            }
        })?;
        debug!(path = %path.display(), "opening capture");
        Self::from_reader(file)
    }

    /// Read a capture from any byte source, detecting compression and format.
    pub fn from_reader<R: Read + Send + 'static>(source: R) -> Result<Self, Error> {
        let decompressed = DecompressReader::detect(source)?;
        let compression = decompressed.compression();
        let (magic, replay) = peek(decompressed, 4)?;
        let format = PcapFormat::detect(&magic)?;
        debug!(%compression, ?format, "detected capture format");
        Self::with_format(Box::new(replay), format)
    }

    /// Create a reader with known format.
    pub fn with_format(source: Source, format: PcapFormat) -> Result<Self, Error> {
        let inner = if format.is_pcapng() {
            let reader = PcapNGReader::new(BUFFER_SIZE, source).map_err(|e| {
                Error::Pcap(PcapError::InvalidFormat {
                    reason: format!("Failed to parse PCAPNG: {e}"),
                })
            })?;
            ReaderInner::Ng(reader)
        } else {
            let reader = LegacyPcapReader::new(BUFFER_SIZE, source).map_err(|e| {
                Error::Pcap(PcapError::InvalidFormat {
                    reason: format!("Failed to parse legacy PCAP: {e}"),
                })
            })?;
            ReaderInner::Legacy(reader)
        };

        Ok(PcapReader {
            inner,
            format,
            frame_number: 0,
            // Ethernet until a header says otherwise
            link_type: 1,
        })
    }

    /// Read the next packet; `Ok(None)` at end of capture.
    pub fn next_packet(&mut self) -> Result<Option<RawPacket>, Error> {
        match &mut self.inner {
            ReaderInner::Legacy(reader) => read_legacy_packet(
                reader,
                self.format.is_nano(),
                &mut self.frame_number,
                &mut self.link_type,
            ),
            ReaderInner::Ng(reader) => {
                read_pcapng_packet(reader, &mut self.frame_number, &mut self.link_type)
            }
        }
    }

    pub fn format(&self) -> PcapFormat {
        self.format
    }

    /// Link type of the most recent header (1 = Ethernet).
    pub fn link_type(&self) -> u16 {
        self.link_type
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_number
    }
}

impl Iterator for PcapReader {
    type Item = Result<RawPacket, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_packet().transpose()
    }
}

fn read_legacy_packet(
    reader: &mut LegacyPcapReader<Source>,
    nanos: bool,
    frame_number: &mut u64,
    link_type: &mut u16,
) -> Result<Option<RawPacket>, Error> {
    use pcap_parser::PcapError as PcapParserError;

    loop {
        match reader.next() {
            Ok((offset, block)) => match block {
                PcapBlockOwned::Legacy(packet) => {
                    *frame_number += 1;

                    let fraction = if nanos {
                        packet.ts_usec as i64 / 1000
                    } else {
                        packet.ts_usec as i64
                    };
                    let raw = RawPacket {
                        frame_number: *frame_number,
                        timestamp_us: (packet.ts_sec as i64) * 1_000_000 + fraction,
                        link_type: *link_type,
                        data: Bytes::copy_from_slice(packet.data),
                    };

                    reader.consume(offset);
                    return Ok(Some(raw));
                }
                PcapBlockOwned::LegacyHeader(header) => {
                    *link_type = header.network.0 as u16;
                    reader.consume(offset);
                }
                _ => reader.consume(offset),
            },
            Err(PcapParserError::Eof) => return Ok(None),
            Err(PcapParserError::Incomplete(_)) => {
                reader.refill().map_err(|e| {
                    Error::Pcap(PcapError::InvalidFormat {
                        reason: format!("Legacy PCAP refill error: {e}"),
                    })
                })?;
            }
            Err(e) => {
                return Err(Error::Pcap(PcapError::InvalidFormat {
                    reason: format!("Legacy PCAP parse error: {e}"),
                }));
            }
        }
    }
}

fn read_pcapng_packet(
    reader: &mut PcapNGReader<Source>,
    frame_number: &mut u64,
    link_type: &mut u16,
) -> Result<Option<RawPacket>, Error> {
    use pcap_parser::pcapng::Block;
    use pcap_parser::PcapError as PcapParserError;

    loop {
        match reader.next() {
            Ok((offset, PcapBlockOwned::NG(block))) => match block {
                Block::InterfaceDescription(idb) => {
                    *link_type = idb.linktype.0 as u16;
                    reader.consume(offset);
                }
                Block::EnhancedPacket(epb) => {
                    *frame_number += 1;
                    let packet = RawPacket {
                        frame_number: *frame_number,
                        // Default interface resolution is microseconds
                        timestamp_us: ((epb.ts_high as i64) << 32) | (epb.ts_low as i64),
                        link_type: *link_type,
                        data: Bytes::copy_from_slice(epb.data),
                    };
                    reader.consume(offset);
                    return Ok(Some(packet));
                }
                Block::SimplePacket(spb) => {
                    *frame_number += 1;
                    let packet = RawPacket {
                        frame_number: *frame_number,
                        timestamp_us: 0,
                        link_type: *link_type,
                        data: Bytes::copy_from_slice(spb.data),
                    };
                    reader.consume(offset);
                    return Ok(Some(packet));
                }
                _ => reader.consume(offset),
            },
            Ok((offset, _)) => reader.consume(offset),
            Err(PcapParserError::Eof) => return Ok(None),
            Err(PcapParserError::Incomplete(_)) => {
                reader.refill().map_err(|e| {
                    Error::Pcap(PcapError::InvalidFormat {
                        reason: format!("PCAPNG refill error: {e}"),
                    })
                })?;
            }
            Err(e) => {
                return Err(Error::Pcap(PcapError::InvalidFormat {
                    reason: format!("PCAPNG parse error: {e}"),
                }));
            }
        }
    }
}
