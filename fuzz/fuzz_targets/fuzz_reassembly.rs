//! Fuzz target for TCP reassembly and connection pairing.
//!
//! Input is a sequence of 8-byte segment descriptors (direction, flags,
//! sequence number, payload length) followed by payload bytes. Every stream
//! is read to its end on its own thread while segments are fed in.

#![no_main]

use std::io::Read;
use std::net::{IpAddr, Ipv4Addr};

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use pcapflow_core::stream::{Assembler, ConnectionTracker, NetFlow, TcpSegment, TransportFlow};

fuzz_target!(|data: &[u8]| {
    let (tracker, mut streams) = ConnectionTracker::new();
    let mut assembler = Assembler::new(tracker.clone());

    // Pipes are bounded, so readers must keep up with the assembler
    let readers = std::thread::spawn(move || {
        let mut threads = Vec::new();
        while let Some(mut stream) = streams.blocking_recv() {
            threads.push(std::thread::spawn(move || {
                let mut sink = Vec::new();
                let _ = stream.read_to_end(&mut sink);
            }));
        }
        for thread in threads {
            let _ = thread.join();
        }
    });

    let client = NetFlow::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
    let ports = TransportFlow::new(40000, 80);

    let mut rest = data;
    let mut timestamp_us = 0;
    while rest.len() >= 8 {
        let (head, tail) = rest.split_at(8);
        let len = usize::from(head[7]).min(tail.len());
        let (payload, tail) = tail.split_at(len);
        rest = tail;

        let reverse = head[0] & 1 == 1;
        let flags = head[1];
        let seq = u32::from_be_bytes([head[2], head[3], head[4], head[5]]);
        timestamp_us += i64::from(head[6]);

        assembler.process(&TcpSegment {
            net: if reverse { client.reverse() } else { client },
            transport: if reverse { ports.reverse() } else { ports },
            seq,
            syn: flags & 0x02 != 0,
            fin: flags & 0x01 != 0,
            rst: flags & 0x04 != 0,
            payload: Bytes::copy_from_slice(payload),
            timestamp_us,
        });
        assembler.flush_older_than(timestamp_us - 200);
    }
    assembler.flush_all();
    tracker.prune();
    tracker.close();
    drop(assembler);
    let _ = readers.join();
});
