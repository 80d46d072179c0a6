use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};

/// A gap in the sequence space that was skipped over (missing data).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceGap {
    pub start_seq: u32,
    pub end_seq: u32,
}

/// Reassembly buffer for one direction of a TCP stream.
///
/// Segments are accepted in any order; bytes become available from
/// [`take_ready`](Self::take_ready) only once everything before them has
/// arrived.
#[derive(Debug)]
pub struct StreamBuffer {
    /// Next expected sequence number.
    expected_seq: u32,
    /// Initial sequence number (from SYN or first segment).
    initial_seq: Option<u32>,
    /// Whether initial_seq was set from a SYN (definitive) vs inferred.
    initial_seq_from_syn: bool,
    /// Out-of-order segments waiting to be reassembled, keyed by sequence number.
    pending: BTreeMap<u32, Bytes>,
    /// Contiguous reassembled data not yet taken.
    ready: BytesMut,
    /// Gaps skipped by a forced drain.
    gaps: Vec<SequenceGap>,
    /// Bytes handed out by take_ready.
    bytes_taken: u64,
    /// Statistics.
    pub segment_count: u32,
    pub retransmit_count: u32,
    pub out_of_order_count: u32,
    /// FIN received.
    pub fin_received: bool,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self {
            expected_seq: 0,
            initial_seq: None,
            initial_seq_from_syn: false,
            pending: BTreeMap::new(),
            ready: BytesMut::new(),
            gaps: Vec::new(),
            bytes_taken: 0,
            segment_count: 0,
            retransmit_count: 0,
            out_of_order_count: 0,
            fin_received: false,
        }
    }

    /// Set the initial sequence number (from SYN).
    ///
    /// Ignored once data has been reassembled; a retransmitted SYN must not
    /// rewind the stream.
    pub fn set_initial_seq(&mut self, seq: u32) {
        if self.initial_seq_from_syn || self.bytes_taken > 0 || !self.ready.is_empty() {
            return;
        }
        self.initial_seq = Some(seq);
        self.initial_seq_from_syn = true;
        self.expected_seq = seq.wrapping_add(1); // SYN consumes one seq
        self.flush_pending();
    }

    /// Add a segment's payload.
    pub fn push(&mut self, seq: u32, data: Bytes) {
        if data.is_empty() {
            return;
        }
        self.segment_count += 1;

        // Fast path: in-order and nothing pending
        if self.initial_seq.is_some() && seq == self.expected_seq && self.pending.is_empty() {
            self.append(data);
            return;
        }

        // If we haven't seen a SYN, use first segment's seq
        let Some(initial) = self.initial_seq else {
            self.initial_seq = Some(seq);
            self.expected_seq = seq;
            self.append(data);
            return;
        };

        let seg_end = seq_add(seq, data.len());

        // Segment starts before expected: retransmit, overlap, or mid-stream rewind
        if seq_lt(seq, self.expected_seq) {
            // Started mid-stream and an earlier segment showed up before
            // anything was handed out: rewind to it.
            if !self.initial_seq_from_syn && self.bytes_taken == 0 && seq_lt(seq, initial) {
                let old_data = std::mem::take(&mut self.ready).freeze();
                if !old_data.is_empty() {
                    self.pending.insert(initial, old_data);
                }
                self.initial_seq = Some(seq);
                self.expected_seq = seq;
                self.insert(seq, data);
                return;
            }

            // Fully before expected (pure retransmit)
            if seq_le(seg_end, self.expected_seq) {
                self.retransmit_count += 1;
                return;
            }
            // Partial overlap - trim the beginning
            let overlap = self.expected_seq.wrapping_sub(seq) as usize;
            self.insert(self.expected_seq, data.slice(overlap..));
            return;
        }

        self.insert(seq, data);
    }

    fn insert(&mut self, seq: u32, data: Bytes) {
        if seq == self.expected_seq {
            self.append(data);
            self.flush_pending();
        } else {
            self.out_of_order_count += 1;
            // Keep the longer copy when the same seq arrives twice
            match self.pending.get(&seq) {
                Some(existing) if existing.len() >= data.len() => self.retransmit_count += 1,
                _ => {
                    self.pending.insert(seq, data);
                }
            }
        }
    }

    fn append(&mut self, data: Bytes) {
        self.expected_seq = seq_add(self.expected_seq, data.len());
        self.ready.extend_from_slice(&data);
    }

    /// Move pending segments that are now in order into the ready buffer.
    ///
    /// Looks segments up by exact sequence number rather than map order so
    /// that wraparound does not stall reassembly.
    fn flush_pending(&mut self) {
        loop {
            if let Some(data) = self.pending.remove(&self.expected_seq) {
                self.append(data);
                continue;
            }

            let behind: Vec<u32> = self
                .pending
                .keys()
                .copied()
                .filter(|&seq| seq_lt(seq, self.expected_seq))
                .collect();
            if behind.is_empty() {
                break;
            }

            for seq in behind {
                let Some(data) = self.pending.remove(&seq) else {
                    continue;
                };
                let end = seq_add(seq, data.len());
                if seq_lt(self.expected_seq, end) {
                    let overlap = self.expected_seq.wrapping_sub(seq) as usize;
                    self.pending
                        .entry(self.expected_seq)
                        .or_insert_with(|| data.slice(overlap..));
                } else {
                    // Retransmit that arrived late
                    self.retransmit_count += 1;
                }
            }

            if !self.pending.contains_key(&self.expected_seq) {
                break;
            }
        }
    }

    /// Take all contiguous bytes reassembled so far.
    pub fn take_ready(&mut self) -> Bytes {
        let data = self.ready.split().freeze();
        self.bytes_taken += data.len() as u64;
        data
    }

    /// Jump over the gap before the next pending segment.
    ///
    /// Returns `false` when nothing is pending.
    pub fn skip_gap(&mut self) -> bool {
        let expected = self.expected_seq;
        let Some(next) = self
            .pending
            .keys()
            .copied()
            .min_by_key(|&seq| seq.wrapping_sub(expected))
        else {
            return false;
        };

        self.gaps.push(SequenceGap {
            start_seq: expected,
            end_seq: next,
        });
        self.expected_seq = next;
        self.flush_pending();
        true
    }

    /// Skip every gap so all buffered bytes become ready.
    pub fn drain_all(&mut self) {
        while self.skip_gap() {}
    }

    pub fn mark_fin(&mut self) {
        self.fin_received = true;
    }

    /// Check if stream is complete (FIN received, nothing waiting on a gap).
    pub fn is_complete(&self) -> bool {
        self.fin_received && self.pending.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Get gaps skipped so far.
    pub fn gaps(&self) -> &[SequenceGap] {
        &self.gaps
    }

    /// Get number of bytes ready to be taken.
    pub fn available(&self) -> usize {
        self.ready.len()
    }

    pub fn stats(&self) -> StreamStats {
        StreamStats {
            segment_count: self.segment_count,
            retransmit_count: self.retransmit_count,
            out_of_order_count: self.out_of_order_count,
            gap_count: self.gaps.len() as u32,
            bytes_available: self.ready.len(),
            bytes_taken: self.bytes_taken,
        }
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Stream statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamStats {
    pub segment_count: u32,
    pub retransmit_count: u32,
    pub out_of_order_count: u32,
    pub gap_count: u32,
    pub bytes_available: usize,
    pub bytes_taken: u64,
}

// Sequence number comparison helpers
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

fn seq_le(a: u32, b: u32) -> bool {
    a == b || seq_lt(a, b)
}

fn seq_add(a: u32, n: usize) -> u32 {
    a.wrapping_add(n as u32)
}
