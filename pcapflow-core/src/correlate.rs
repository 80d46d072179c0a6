//! Request/response correlation.
//!
//! Requests wait in an [`EvictionCache`] keyed by `connection_id/exchange_id`
//! until the response with the same key arrives. A request whose response
//! never shows up is evicted after the timeout and emitted as an exchange
//! without a response.
//!
//! All messages are handled on one task in arrival order, so operations on
//! a key never race each other. A response that arrives before its request
//! (or has no request at all) is dropped.
//!
//! Once every message sender is gone the correlator keeps running only until
//! the requests it still holds have timed out.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::cache::{EvictionCache, Evictions};
use crate::message::{Exchange, Message, Request};

/// Capacity of the message and exchange queues.
pub const QUEUE_DEPTH: usize = 1024;

const MIN_SWEEP: Duration = Duration::from_millis(10);

/// Sweep interval used by [`Correlator::new`] for a given timeout.
pub fn default_sweep(timeout: Duration) -> Duration {
    (timeout / 4).max(MIN_SWEEP)
}

/// Outcome counters for one correlator run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub requests: u64,
    pub matched: u64,
    pub timed_out: u64,
    pub orphaned_responses: u64,
}

/// Pairs requests with responses.
pub struct Correlator {
    cache: EvictionCache<Request>,
    evictions: Evictions<Request>,
    messages: mpsc::Receiver<Message>,
    exchanges: mpsc::Sender<Exchange>,
    stats: CorrelatorStats,
}

impl Correlator {
    /// Create a correlator holding unanswered requests for `timeout`.
    ///
    /// Returns the correlator, the sender for incoming messages and the
    /// receiver for completed exchanges. Must be called inside a Tokio
    /// runtime.
    pub fn new(timeout: Duration) -> (Self, mpsc::Sender<Message>, mpsc::Receiver<Exchange>) {
        Self::with_sweep(timeout, default_sweep(timeout))
    }

    pub fn with_sweep(
        timeout: Duration,
        sweep_interval: Duration,
    ) -> (Self, mpsc::Sender<Message>, mpsc::Receiver<Exchange>) {
        let (cache, evictions) = EvictionCache::new(timeout, sweep_interval);
        let (msg_tx, msg_rx) = mpsc::channel(QUEUE_DEPTH);
        let (ex_tx, ex_rx) = mpsc::channel(QUEUE_DEPTH);

        let correlator = Self {
            cache,
            evictions,
            messages: msg_rx,
            exchanges: ex_tx,
            stats: CorrelatorStats::default(),
        };
        (correlator, msg_tx, ex_rx)
    }

    /// Run until `cancel` fires, the exchange receiver goes away, or the
    /// message queue is closed and no request is left waiting.
    ///
    /// Requests still waiting when `cancel` fires are abandoned.
    pub async fn start(mut self, cancel: CancellationToken) -> CorrelatorStats {
        let mut input_open = true;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = self.messages.recv(), if input_open => match message {
                    Some(message) => {
                        if !self.handle(message, &cancel).await {
                            break;
                        }
                    }
                    // Keep running so cached requests can still time out
                    None => {
                        input_open = false;
                        if self.cache.is_empty() {
                            self.flush_evicted(&cancel).await;
                            break;
                        }
                    }
                },
                evicted = self.evictions.recv() => match evicted {
                    Some(request) => {
                        if !self.timed_out(request, &cancel).await {
                            break;
                        }
                        if !input_open && self.cache.is_empty() {
                            self.flush_evicted(&cancel).await;
                            break;
                        }
                    }
                    None => break,
                },
            }
        }

        debug!(
            requests = self.stats.requests,
            matched = self.stats.matched,
            timed_out = self.stats.timed_out,
            orphaned = self.stats.orphaned_responses,
            abandoned = self.cache.len(),
            cache = %self.cache.stats().format_summary(),
            "correlator stopped"
        );
        self.cache.close();
        self.stats
    }

    async fn handle(&mut self, message: Message, cancel: &CancellationToken) -> bool {
        let key = message.key();
        match message {
            Message::Request(request) => {
                self.stats.requests += 1;
                self.cache.add(key, request);
                true
            }
            Message::Response(response) => match self.cache.remove(&key) {
                Some(request) => {
                    self.stats.matched += 1;
                    let exchange = Exchange {
                        request,
                        response: Some(response),
                    };
                    self.emit(exchange, cancel).await
                }
                None => {
                    self.stats.orphaned_responses += 1;
                    debug!(key = %key, status = response.status, "dropping response without request");
                    true
                }
            },
        }
    }

    async fn timed_out(&mut self, request: Request, cancel: &CancellationToken) -> bool {
        trace!(key = %request.meta.key(), "request timed out");
        self.stats.timed_out += 1;
        self.emit(Exchange { request, response: None }, cancel).await
    }

    /// Emit requests the sweep already took out of the cache.
    async fn flush_evicted(&mut self, cancel: &CancellationToken) {
        while let Ok(request) = self.evictions.try_recv() {
            if !self.timed_out(request, cancel).await {
                break;
            }
        }
    }

    async fn emit(&self, exchange: Exchange, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            sent = self.exchanges.send(exchange) => sent.is_ok(),
        }
    }
}
