//! Fuzz target for capture file reading and frame decoding.
//!
//! Tests handling of malformed PCAP/PCAPNG files including:
//! - Magic byte detection
//! - Global header parsing
//! - Packet record headers (caplen, origlen, timestamps)
//! - Link-layer and IP/TCP header decoding of every frame

#![no_main]

use libfuzzer_sys::fuzz_target;
use pcapflow_core::pcap::{decode_tcp, PcapReader};

fuzz_target!(|data: &[u8]| {
    let Ok(reader) = PcapReader::from_reader(std::io::Cursor::new(data.to_vec())) else {
        return;
    };
    for packet in reader.take(10_000) {
        let Ok(packet) = packet else { break };
        let _ = decode_tcp(packet.link_type, &packet.data, packet.timestamp_us);
    }
});
