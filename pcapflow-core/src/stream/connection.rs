//! Pairing of half-duplex flows into logical connections.
//!
//! The reassembler calls [`ConnectionTracker::new_stream`] once for every new
//! half-duplex flow. The first flow of a 4-tuple creates a connection and is
//! marked `up`; the connection is stored under the *reverse* flow identity so
//! the opposite direction finds it and is attached as `down`. Every stream is
//! published on the tracker's queue as a [`StreamHandle`].
//!
//! Connections are removed by [`ConnectionTracker::prune`], a full sweep run
//! by the caller on its own schedule, once reassembly of either direction has
//! completed. A pruned connection is never looked up again: a finished TCP
//! connection does not reappear with the same 4-tuple within one capture.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use super::context::{destination_endpoint, flow_key, source_endpoint};
use super::handle::{pipe, PipeWriter};
use super::{Direction, NetFlow, StreamHandle, StreamMeta, TransportFlow};

/// A pair of half-duplex flows tracked as one bidirectional connection.
#[derive(Debug, Clone)]
pub struct LogicalConnection {
    pub id: u64,
    pub up: StreamMeta,
    pub down: Option<StreamMeta>,
    /// Reassembly of either direction has finished.
    pub complete: bool,
}

struct State {
    connections: HashMap<String, LogicalConnection>,
    next_id: u64,
    /// `None` once the tracker is closed.
    streams: Option<mpsc::UnboundedSender<StreamHandle>>,
}

/// Tracks logical connections and publishes their streams.
pub struct ConnectionTracker {
    state: Mutex<State>,
}

impl ConnectionTracker {
    /// Create a tracker and the queue its streams are published on.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<StreamHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tracker = Arc::new(Self {
            state: Mutex::new(State {
                connections: HashMap::new(),
                next_id: 1,
                streams: Some(tx),
            }),
        });
        (tracker, rx)
    }

    /// Register a newly observed half-duplex flow.
    ///
    /// Returns the writer the reassembler feeds with in-order bytes. After
    /// [`close`](Self::close) the writer is still returned but its stream is
    /// never published, so writes go nowhere.
    pub fn new_stream(self: &Arc<Self>, net: NetFlow, transport: TransportFlow) -> StreamWriter {
        let id_key = flow_key(&net, &transport);
        let src = source_endpoint(&net, &transport);
        let dst = destination_endpoint(&net, &transport);

        let (writer, reader) = pipe();
        let mut state = self.state.lock();

        let (table_key, meta) = match state.connections.get_mut(&id_key) {
            Some(conn) => {
                let meta = StreamMeta::new(conn.id, Direction::Down, src, dst);
                if conn.down.is_some() {
                    debug!(connection_id = conn.id, flow = %id_key, "replacing down stream");
                }
                conn.down = Some(meta.clone());
                (id_key, meta)
            }
            None => {
                let rev_key = flow_key(&net.reverse(), &transport.reverse());
                let id = state.next_id;
                state.next_id += 1;

                let meta = StreamMeta::new(id, Direction::Up, src, dst);
                let conn = LogicalConnection {
                    id,
                    up: meta.clone(),
                    down: None,
                    complete: false,
                };
                if let Some(old) = state.connections.insert(rev_key.clone(), conn) {
                    debug!(
                        connection_id = old.id,
                        flow = %id_key,
                        "flow restarted before its connection was pruned"
                    );
                }
                (rev_key, meta)
            }
        };

        debug!(
            connection_id = meta.connection_id,
            direction = %meta.direction,
            src = %meta.src,
            dst = %meta.dst,
            "new stream"
        );

        if let Some(streams) = &state.streams {
            // Receiver gone means nobody wants streams any more; same as closed.
            let _ = streams.send(StreamHandle::new(meta.clone(), reader));
        }
        drop(state);

        StreamWriter {
            pipe: writer,
            key: table_key,
            meta,
            tracker: Arc::clone(self),
        }
    }

    /// Mark the connection stored under `key` as complete.
    pub fn reassembly_complete(&self, key: &str) {
        if let Some(conn) = self.state.lock().connections.get_mut(key) {
            conn.complete = true;
        }
    }

    /// Remove every completed connection, returning how many were removed.
    pub fn prune(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.connections.len();
        state.connections.retain(|_, conn| !conn.complete);
        let removed = before - state.connections.len();
        if removed > 0 {
            debug!(removed, live = state.connections.len(), "pruned connections");
        }
        removed
    }

    /// Stop publishing streams and close the stream queue. Idempotent.
    pub fn close(&self) {
        self.state.lock().streams = None;
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().streams.is_none()
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the live connection table.
    pub fn connections(&self) -> Vec<LogicalConnection> {
        self.state.lock().connections.values().cloned().collect()
    }
}

/// Write side of one tracked half-duplex stream.
pub struct StreamWriter {
    pipe: PipeWriter,
    key: String,
    meta: StreamMeta,
    tracker: Arc<ConnectionTracker>,
}

impl StreamWriter {
    /// Push in-order bytes to the stream's reader.
    ///
    /// Returns `false` once the reader has gone away.
    pub fn write(&self, data: Bytes) -> bool {
        self.pipe.write(data)
    }

    pub fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    /// Signal that reassembly of this stream is finished and end the stream.
    pub fn complete(self) {
        self.tracker.reassembly_complete(&self.key);
    }
}
