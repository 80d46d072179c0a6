use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::ComponentConfig;
use crate::correlate::{default_sweep, Correlator, QUEUE_DEPTH};
use crate::error::Result;
use crate::message::{Message, Record};
use crate::middleware::Middleware;
use crate::pipeline::{InputContext, InputFormat, StreamDecoder};
use crate::stream::parsers::DEFAULT_HEADER_LIMIT;
use crate::stream::{HttpStreamParser, StreamHandle};

/// HTTP/1.x exchanges.
///
/// Every stream is parsed into messages numbered per stream, optionally
/// passed through a middleware process, then paired up by a correlator
/// shared by all streams of the input.
#[derive(Debug, Clone)]
pub struct HttpFormat {
    correlation_timeout: Duration,
    sweep_interval: Duration,
    middleware: Option<String>,
    header_limit: usize,
}

impl HttpFormat {
    pub fn new(correlation_timeout: Duration) -> Self {
        Self {
            correlation_timeout,
            sweep_interval: default_sweep(correlation_timeout),
            middleware: None,
            header_limit: DEFAULT_HEADER_LIMIT,
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Self {
        Self {
            correlation_timeout: config.correlation_timeout,
            sweep_interval: config.sweep_interval(),
            middleware: config.middleware.clone(),
            header_limit: config.header_limit,
        }
    }

    pub fn with_middleware(mut self, command: impl Into<String>) -> Self {
        self.middleware = Some(command.into());
        self
    }
}

impl InputFormat for HttpFormat {
    fn start(&self, ctx: &InputContext) -> Result<Arc<dyn StreamDecoder>> {
        let (correlator, correlate_tx, mut exchanges) =
            Correlator::with_sweep(self.correlation_timeout, self.sweep_interval);

        // The correlator and middleware live in the output scope so requests
        // parsed while the input drains can still be paired.
        let messages = match &self.middleware {
            Some(command) => {
                let middleware = Middleware::spawn(command)?;
                let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
                tokio::spawn(middleware.filter(rx, correlate_tx, ctx.errors.clone(), ctx.teardown.clone()));
                tx
            }
            None => correlate_tx,
        };

        let teardown = ctx.teardown.clone();
        tokio::spawn(async move {
            let stats = correlator.start(teardown).await;
            debug!(?stats, "correlation finished");
        });

        let records = ctx.records.clone();
        tokio::spawn(async move {
            while let Some(exchange) = exchanges.recv().await {
                if records.send(Record::Exchange(exchange)).await.is_err() {
                    break;
                }
            }
        });

        Ok(Arc::new(HttpDecoder {
            messages,
            header_limit: self.header_limit,
            gate: ExchangeGate::new(self.correlation_timeout),
        }))
    }
}

#[derive(Debug, Default)]
struct ConnectionProgress {
    requests: u64,
    open_streams: u32,
    ended_streams: u32,
    /// A response already waited the full time; later ones do not wait.
    timed_out: bool,
    /// Set while no stream of the connection is being decoded.
    idle_since: Option<Instant>,
}

struct GateState {
    connections: HashMap<u64, ConnectionProgress>,
    pruned_at: Instant,
}

impl GateState {
    /// Drop connections idle for at least `max_wait`. A stream starting
    /// later could only wait for requests the correlator already timed out.
    fn prune(&mut self, now: Instant, max_wait: Duration) {
        self.connections.retain(|_, progress| {
            progress
                .idle_since
                .map_or(true, |since| now.duration_since(since) < max_wait)
        });
        self.pruned_at = now;
    }
}

/// Holds a response back until its request has been handed on.
///
/// Both directions of a connection are decoded concurrently, and a replayed
/// capture fills both at once, so the response side can otherwise win.
///
/// A connection is forgotten once both of its streams ended, or once it has
/// had no stream in flight for `max_wait`.
struct ExchangeGate {
    state: Mutex<GateState>,
    changed: Condvar,
    max_wait: Duration,
}

impl ExchangeGate {
    fn new(max_wait: Duration) -> Self {
        Self {
            state: Mutex::new(GateState {
                connections: HashMap::new(),
                pruned_at: Instant::now(),
            }),
            changed: Condvar::new(),
            max_wait,
        }
    }

    fn stream_started(&self, connection_id: u64) {
        let mut state = self.state.lock();
        let entry = state.connections.entry(connection_id).or_default();
        entry.open_streams += 1;
        entry.idle_since = None;
    }

    fn request_sent(&self, connection_id: u64) {
        self.state.lock().connections.entry(connection_id).or_default().requests += 1;
        self.changed.notify_all();
    }

    /// Wait until request `exchange_id` of the connection was sent or the
    /// other direction ended. Returns `false` if the wait timed out.
    fn await_request(&self, connection_id: u64, exchange_id: u64) -> bool {
        let deadline = Instant::now() + self.max_wait;
        let mut state = self.state.lock();
        loop {
            let entry = state.connections.entry(connection_id).or_default();
            if entry.requests > exchange_id || entry.ended_streams > 0 {
                return true;
            }
            if entry.timed_out {
                return false;
            }
            if self.changed.wait_until(&mut state, deadline).timed_out() {
                state.connections.entry(connection_id).or_default().timed_out = true;
                return false;
            }
        }
    }

    fn stream_ended(&self, connection_id: u64) {
        let now = Instant::now();
        let mut state = self.state.lock();
        let entry = state.connections.entry(connection_id).or_default();
        entry.open_streams = entry.open_streams.saturating_sub(1);
        entry.ended_streams += 1;
        let finished = entry.ended_streams >= 2;
        if entry.open_streams == 0 {
            entry.idle_since = Some(now);
        }
        if finished {
            state.connections.remove(&connection_id);
        }
        if now.duration_since(state.pruned_at) >= self.max_wait {
            state.prune(now, self.max_wait);
        }
        drop(state);
        self.changed.notify_all();
    }

    #[cfg(test)]
    fn prune_idle(&self) {
        self.state.lock().prune(Instant::now(), self.max_wait);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.state.lock().connections.len()
    }
}

struct HttpDecoder {
    messages: mpsc::Sender<Message>,
    header_limit: usize,
    gate: ExchangeGate,
}

impl HttpDecoder {
    fn forward(&self, stream: StreamHandle) -> Result<()> {
        let (meta, reader) = stream.into_parts();
        let connection_id = meta.connection_id;
        let mut parser = HttpStreamParser::with_header_limit(reader, self.header_limit);

        let mut exchange_id = 0;
        while let Some(message) = parser.next_message(connection_id, exchange_id)? {
            let request = message.is_request();
            trace!(stream = %meta, exchange_id, request, "parsed message");
            if !request && !self.gate.await_request(connection_id, exchange_id) {
                debug!(stream = %meta, exchange_id, "no request seen for response");
            }
            if self.messages.blocking_send(message).is_err() {
                debug!(stream = %meta, "correlator gone, dropping stream");
                break;
            }
            if request {
                self.gate.request_sent(connection_id);
            }
            exchange_id += 1;
        }
        Ok(())
    }
}

impl StreamDecoder for HttpDecoder {
    fn decode(&self, stream: StreamHandle) -> Result<()> {
        let connection_id = stream.meta().connection_id;
        self.gate.stream_started(connection_id);
        let result = self.forward(stream);
        self.gate.stream_ended(connection_id);
        result
    }
}

/// One record per line of text; line terminators are stripped.
#[derive(Debug, Clone, Copy)]
pub struct LinesFormat;

impl InputFormat for LinesFormat {
    fn start(&self, ctx: &InputContext) -> Result<Arc<dyn StreamDecoder>> {
        Ok(Arc::new(LinesDecoder {
            records: ctx.records.clone(),
        }))
    }
}

struct LinesDecoder {
    records: mpsc::Sender<Record>,
}

impl StreamDecoder for LinesDecoder {
    fn decode(&self, stream: StreamHandle) -> Result<()> {
        for line in BufReader::new(stream).lines() {
            if self.records.blocking_send(Record::Line(line?)).is_err() {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pipeline::ErrorReporter;
    use crate::stream::{Direction, StreamMeta};
    use std::io::Cursor;
    use tokio_util::sync::CancellationToken;

    fn context() -> (InputContext, mpsc::Receiver<Record>, mpsc::UnboundedReceiver<Error>) {
        let (records, rx) = mpsc::channel(64);
        let (errors, errors_rx) = ErrorReporter::channel();
        let ctx = InputContext {
            cancel: CancellationToken::new(),
            teardown: CancellationToken::new(),
            records,
            errors,
        };
        (ctx, rx, errors_rx)
    }

    fn stream(id: u64, direction: Direction, data: &'static [u8]) -> StreamHandle {
        StreamHandle::new(StreamMeta::new(id, direction, "a", "b"), Cursor::new(data))
    }

    // Test 1: Pipelined requests pair with responses on the reverse stream
    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_pairs_exchanges() {
        let (ctx, mut records, _errors) = context();
        let decoder = HttpFormat::new(Duration::from_secs(5)).start(&ctx).unwrap();
        drop(ctx);

        tokio::task::spawn_blocking(move || {
            decoder
                .decode(stream(
                    4,
                    Direction::Up,
                    b"GET /a HTTP/1.1\r\nHost: x\r\n\r\nGET /b HTTP/1.1\r\nHost: x\r\n\r\n",
                ))
                .unwrap();
            decoder
                .decode(stream(
                    4,
                    Direction::Down,
                    b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nokHTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n",
                ))
                .unwrap();
        })
        .await
        .unwrap();

        let mut seen = Vec::new();
        while let Some(record) = records.recv().await {
            let Record::Exchange(exchange) = record else {
                panic!("expected exchange");
            };
            let response = exchange.response.expect("matched");
            seen.push((exchange.request.uri, response.status));
        }
        assert_eq!(seen, [("/a".to_string(), 200), ("/b".to_string(), 404)]);
    }

    // Test 2: Malformed stream is an error for that stream only
    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_malformed_stream() {
        let (ctx, _records, _errors) = context();
        let decoder = HttpFormat::new(Duration::from_secs(5)).start(&ctx).unwrap();

        let err = tokio::task::spawn_blocking(move || decoder.decode(stream(1, Direction::Up, b"\x00\x01garbage\r\n\r\n")))
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, Error::Http(_)));
    }

    // Test 3: Unanswered request comes out as a timed-out exchange
    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_unanswered_request() {
        let (ctx, mut records, _errors) = context();
        let decoder = HttpFormat::new(Duration::from_millis(50)).start(&ctx).unwrap();
        drop(ctx);

        tokio::task::spawn_blocking(move || {
            decoder
                .decode(stream(2, Direction::Up, b"POST /x HTTP/1.1\r\nContent-Length: 1\r\n\r\nz"))
                .unwrap();
        })
        .await
        .unwrap();

        let Some(Record::Exchange(exchange)) = records.recv().await else {
            panic!("expected exchange");
        };
        assert!(exchange.timed_out());
        assert_eq!(exchange.request.body, b"z");
        assert!(records.recv().await.is_none());
    }

    // Test 4: Lines become line records
    #[tokio::test(flavor = "multi_thread")]
    async fn test_lines_format() {
        let (ctx, mut records, _errors) = context();
        let decoder = LinesFormat.start(&ctx).unwrap();
        drop(ctx);

        tokio::task::spawn_blocking(move || decoder.decode(stream(1, Direction::Up, b"one\ntwo\r\nthree")))
            .await
            .unwrap()
            .unwrap();

        let mut lines = Vec::new();
        while let Some(Record::Line(line)) = records.recv().await {
            lines.push(line);
        }
        assert_eq!(lines, ["one", "two", "three"]);
    }

    // Test 5: A response decoded first still pairs with its request
    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_response_waits_for_request() {
        let (ctx, mut records, _errors) = context();
        let decoder = HttpFormat::new(Duration::from_secs(5)).start(&ctx).unwrap();
        drop(ctx);

        let down = decoder.clone();
        let responses = tokio::task::spawn_blocking(move || {
            down.decode(stream(
                7,
                Direction::Down,
                b"HTTP/1.1 201 Created\r\nContent-Length: 0\r\n\r\n",
            ))
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let requests = tokio::task::spawn_blocking(move || {
            decoder.decode(stream(7, Direction::Up, b"PUT /thing HTTP/1.1\r\nContent-Length: 0\r\n\r\n"))
        });
        responses.await.unwrap().unwrap();
        requests.await.unwrap().unwrap();

        let Some(Record::Exchange(exchange)) = records.recv().await else {
            panic!("expected exchange");
        };
        assert_eq!(exchange.response.map(|r| r.status), Some(201));
    }

    // Test 6: One-sided connections are forgotten once idle
    #[test]
    fn test_gate_forgets_idle_connections() {
        let gate = ExchangeGate::new(Duration::from_millis(20));

        gate.stream_started(1);
        gate.request_sent(1);
        gate.stream_ended(1);
        // The reverse direction may still start
        assert_eq!(gate.tracked(), 1);
        assert!(gate.await_request(1, 5));

        std::thread::sleep(Duration::from_millis(30));
        gate.prune_idle();
        assert_eq!(gate.tracked(), 0);
    }

    // Test 7: A connection whose streams both ended is dropped at once
    #[test]
    fn test_gate_forgets_finished_connections() {
        let gate = ExchangeGate::new(Duration::from_secs(60));
        gate.stream_started(3);
        gate.stream_started(3);
        gate.request_sent(3);
        gate.stream_ended(3);
        gate.prune_idle();
        assert_eq!(gate.tracked(), 1);
        gate.stream_ended(3);
        assert_eq!(gate.tracked(), 0);
    }

    // Test 8: Decoding a request-only stream leaves nothing behind
    #[tokio::test(flavor = "multi_thread")]
    async fn test_http_request_only_connection() {
        let max_wait = Duration::from_millis(20);
        let (_correlator, messages, _exchanges) = Correlator::new(max_wait);
        let decoder = Arc::new(HttpDecoder {
            messages,
            header_limit: DEFAULT_HEADER_LIMIT,
            gate: ExchangeGate::new(max_wait),
        });

        let worker = decoder.clone();
        tokio::task::spawn_blocking(move || {
            worker
                .decode(stream(9, Direction::Up, b"GET /scan HTTP/1.1\r\n\r\n"))
                .unwrap();
            std::thread::sleep(Duration::from_millis(30));
            worker.gate.prune_idle();
        })
        .await
        .unwrap();
        assert_eq!(decoder.gate.tracked(), 0);
    }

    // Test 9: Missing middleware binary fails start
    #[tokio::test]
    async fn test_http_middleware_spawn_failure() {
        let (ctx, _records, _errors) = context();
        let format = HttpFormat::new(Duration::from_secs(1)).with_middleware("/nonexistent/rewrite-tool");
        let err = format.start(&ctx).err().unwrap();
        assert!(matches!(err, Error::Middleware(_)));
    }
}
