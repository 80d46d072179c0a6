//! Per-flow reassembly feeding the connection tracker.
//!
//! The assembler owns one [`StreamBuffer`] per directional 4-tuple. The first
//! SYN or payload-carrying segment of a flow registers it with the
//! [`ConnectionTracker`]; from then on every newly contiguous run of bytes is
//! written to the flow's stream. A flow is finished on RST, on FIN once no
//! segment is waiting on a gap, or when it is flushed for being idle.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, trace};

use super::connection::{ConnectionTracker, StreamWriter};
use super::reassembly::StreamBuffer;
use super::{NetFlow, TransportFlow};

/// One decoded TCP segment.
#[derive(Debug, Clone)]
pub struct TcpSegment {
    pub net: NetFlow,
    pub transport: TransportFlow,
    pub seq: u32,
    pub syn: bool,
    pub fin: bool,
    pub rst: bool,
    pub payload: Bytes,
    /// Capture timestamp in microseconds since the epoch.
    pub timestamp_us: i64,
}

struct HalfFlow {
    buffer: StreamBuffer,
    writer: StreamWriter,
    last_seen_us: i64,
}

impl HalfFlow {
    /// Forward whatever became contiguous.
    fn forward(&mut self) {
        let ready = self.buffer.take_ready();
        if !ready.is_empty() && !self.writer.write(ready) {
            trace!(stream = %self.writer.meta(), "stream reader gone, discarding bytes");
        }
    }

    fn finish(mut self) {
        self.buffer.drain_all();
        self.forward();
        let stats = self.buffer.stats();
        debug!(
            stream = %self.writer.meta(),
            segments = stats.segment_count,
            retransmits = stats.retransmit_count,
            gaps = stats.gap_count,
            bytes = stats.bytes_taken,
            "stream reassembly complete"
        );
        self.writer.complete();
    }
}

/// Counters describing assembler activity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    pub segments: u64,
    pub flows_created: u64,
    pub flows_completed: u64,
}

/// Reassembles every half-duplex flow seen in a capture.
pub struct Assembler {
    tracker: Arc<ConnectionTracker>,
    flows: HashMap<(NetFlow, TransportFlow), HalfFlow>,
    stats: AssemblerStats,
}

impl Assembler {
    pub fn new(tracker: Arc<ConnectionTracker>) -> Self {
        Self {
            tracker,
            flows: HashMap::new(),
            stats: AssemblerStats::default(),
        }
    }

    /// Feed one segment.
    pub fn process(&mut self, segment: &TcpSegment) {
        self.stats.segments += 1;
        let key = (segment.net, segment.transport);

        if !self.flows.contains_key(&key) {
            // A bare ACK/FIN/RST for a flow we never saw carries nothing
            if !segment.syn && segment.payload.is_empty() {
                return;
            }
            let writer = self.tracker.new_stream(segment.net, segment.transport);
            self.stats.flows_created += 1;
            self.flows.insert(
                key,
                HalfFlow {
                    buffer: StreamBuffer::new(),
                    writer,
                    last_seen_us: segment.timestamp_us,
                },
            );
        }

        let Some(flow) = self.flows.get_mut(&key) else {
            return;
        };
        flow.last_seen_us = segment.timestamp_us;

        let mut data_seq = segment.seq;
        if segment.syn {
            flow.buffer.set_initial_seq(segment.seq);
            data_seq = segment.seq.wrapping_add(1);
        }
        flow.buffer.push(data_seq, segment.payload.clone());
        flow.forward();

        if segment.fin {
            flow.buffer.mark_fin();
        }

        if segment.rst || flow.buffer.is_complete() {
            if let Some(flow) = self.flows.remove(&key) {
                self.stats.flows_completed += 1;
                flow.finish();
            }
        }
    }

    /// Complete every flow idle since before `cutoff_us`, skipping any gaps.
    pub fn flush_older_than(&mut self, cutoff_us: i64) -> usize {
        let idle: Vec<_> = self
            .flows
            .iter()
            .filter(|(_, flow)| flow.last_seen_us < cutoff_us)
            .map(|(key, _)| *key)
            .collect();

        for key in &idle {
            if let Some(flow) = self.flows.remove(key) {
                flow.finish();
            }
        }
        self.stats.flows_completed += idle.len() as u64;
        idle.len()
    }

    /// Complete every remaining flow.
    pub fn flush_all(&mut self) -> usize {
        let count = self.flows.len();
        for (_, flow) in self.flows.drain() {
            flow.finish();
        }
        self.stats.flows_completed += count as u64;
        count
    }

    /// Number of flows still being reassembled.
    pub fn open_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn stats(&self) -> &AssemblerStats {
        &self.stats
    }
}
