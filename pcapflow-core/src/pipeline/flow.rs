use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{ErrorReporter, Input, InputContext, Output, RECORD_QUEUE};
use crate::error::{Error, PipelineError, Result};
use crate::message::Record;

/// Timing of a flow's run and shutdown phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
    /// Stop on its own after this long; `None` runs until cancelled or the
    /// input is exhausted.
    pub run_for: Option<Duration>,
    /// Grace period for in-flight input after the input scope is cancelled.
    pub drain: Duration,
    /// Upper bound on waiting for outputs to flush and close.
    pub shutdown: Duration,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            run_for: None,
            drain: Duration::from_secs(2),
            shutdown: Duration::from_secs(10),
        }
    }
}

/// Counters for one flow run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowStats {
    pub records: u64,
    pub drained_records: u64,
    pub outputs_timed_out: usize,
}

/// One input fanned out to one or more outputs.
pub struct Flow {
    input: Input,
    outputs: Vec<Arc<Output>>,
    config: FlowConfig,
}

impl Flow {
    pub fn new(input: Input, outputs: Vec<Output>, config: FlowConfig) -> Result<Self> {
        if outputs.is_empty() {
            return Err(PipelineError::NoOutputs.into());
        }
        Ok(Self {
            input,
            outputs: outputs.into_iter().map(Arc::new).collect(),
            config,
        })
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter().map(|o| o.as_ref())
    }

    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    /// Run until `cancel` fires, the run duration elapses or the input is
    /// exhausted, then shut down in two phases:
    ///
    /// 1. cancel the input scope and keep dispatching records for up to the
    ///    drain duration;
    /// 2. cancel the output scope and wait up to the shutdown duration for
    ///    every output to flush and close.
    pub async fn run(self, cancel: CancellationToken, errors: ErrorReporter) -> FlowStats {
        let Flow {
            input,
            outputs,
            config,
        } = self;
        let mut stats = FlowStats::default();
        let dispatches = TaskTracker::new();

        let input_cancel = CancellationToken::new();
        let output_cancel = CancellationToken::new();

        let output_tasks: Vec<_> = outputs
            .iter()
            .map(|output| {
                let output = output.clone();
                let cancel = output_cancel.clone();
                tokio::spawn(async move { output.run(cancel).await })
            })
            .collect();

        let (records_tx, mut records_rx) = mpsc::channel(RECORD_QUEUE);
        let ctx = InputContext {
            cancel: input_cancel.clone(),
            teardown: output_cancel.clone(),
            records: records_tx,
            errors: errors.clone(),
        };
        let input_line = input.line().to_string();
        let input_errors = errors.clone();
        tokio::spawn(async move {
            if let Err(e) = input.run(ctx).await {
                input_errors.report(e);
            }
        });
        info!(input = %input_line, outputs = outputs.len(), "flow started");

        let run_timer = async {
            match config.run_for {
                Some(duration) => sleep(duration).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(run_timer);

        let mut input_open = true;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("flow cancelled");
                    break;
                }
                _ = &mut run_timer => {
                    info!("run duration elapsed");
                    break;
                }
                record = records_rx.recv() => match record {
                    Some(record) => {
                        stats.records += 1;
                        dispatch(&dispatches, &outputs, record, &errors);
                    }
                    None => {
                        info!("input exhausted");
                        input_open = false;
                        break;
                    }
                },
            }
        }

        // Phase 1: drain input
        input_cancel.cancel();
        if input_open {
            let drain = sleep(config.drain);
            tokio::pin!(drain);
            loop {
                tokio::select! {
                    _ = &mut drain => break,
                    record = records_rx.recv() => match record {
                        Some(record) => {
                            stats.drained_records += 1;
                            dispatch(&dispatches, &outputs, record, &errors);
                        }
                        None => break,
                    },
                }
            }
        }
        drop(records_rx);
        debug!(drained = stats.drained_records, "input drained");

        // Phase 2: flush and close outputs
        let deadline = Instant::now() + config.shutdown;
        dispatches.close();
        if timeout_at(deadline, dispatches.wait()).await.is_err() {
            warn!(pending = dispatches.len(), "records still queued for outputs at shutdown");
        }
        output_cancel.cancel();
        for (output, task) in outputs.iter().zip(output_tasks) {
            match timeout_at(deadline, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => errors.report(e),
                Ok(Err(e)) => errors.report(std::io::Error::other(e)),
                Err(_) => {
                    stats.outputs_timed_out += 1;
                    warn!(output = %output.line(), shutdown = ?config.shutdown, "output did not close in time");
                }
            }
        }

        info!(records = stats.records + stats.drained_records, "flow finished");
        stats
    }
}

/// Hand one record to every output on its own task so a slow output does
/// not stall the flow loop.
fn dispatch(
    dispatches: &TaskTracker,
    outputs: &[Arc<Output>],
    record: Record,
    errors: &ErrorReporter,
) {
    let record = Arc::new(record);
    let outputs = outputs.to_vec();
    let errors = errors.clone();
    dispatches.spawn(async move {
        for output in outputs {
            match output.write(record.clone()).await {
                Ok(()) => {}
                Err(Error::Pipeline(PipelineError::OutputClosed { output })) => {
                    debug!(%output, "record arrived after output closed");
                }
                Err(e) => errors.report(e),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::LinesFormat;
    use crate::error::CloseErrors;
    use crate::pipeline::{InputFormat, OutputFormat, SinkWriter, Source, StreamDecoder};
    use crate::stream::{Direction, StreamHandle, StreamMeta};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::io::Write;

    struct Nothing;

    #[async_trait]
    impl Source for Nothing {
        async fn run(&self, cancel: CancellationToken, _streams: mpsc::Sender<StreamHandle>) -> Result<()> {
            cancel.cancelled().await;
            Ok(())
        }
    }

    struct NoFormat;

    impl InputFormat for NoFormat {
        fn start(&self, _ctx: &InputContext) -> Result<Arc<dyn StreamDecoder>> {
            Err(std::io::Error::other("format unavailable").into())
        }
    }

    // Test 1: A flow needs outputs
    #[test]
    fn test_flow_requires_outputs() {
        let input = Input::new("x|y", Box::new(Nothing), vec![], Box::new(NoFormat));
        let err = Flow::new(input, vec![], FlowConfig::default()).err().unwrap();
        assert!(matches!(err, Error::Pipeline(PipelineError::NoOutputs)));
    }

    /// Yields one numbered line per read, pausing before all but the first.
    struct Trickle {
        next: usize,
        lines: usize,
        gap: Duration,
    }

    impl std::io::Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.next == self.lines {
                return Ok(0);
            }
            if self.next > 0 {
                std::thread::sleep(self.gap);
            }
            let line = format!("{}\n", self.next);
            let n = line.len().min(buf.len());
            buf[..n].copy_from_slice(&line.as_bytes()[..n]);
            self.next += 1;
            Ok(n)
        }
    }

    struct TrickleSource {
        lines: usize,
        gap: Duration,
    }

    #[async_trait]
    impl Source for TrickleSource {
        async fn run(&self, _cancel: CancellationToken, streams: mpsc::Sender<StreamHandle>) -> Result<()> {
            let reader = Trickle {
                next: 0,
                lines: self.lines,
                gap: self.gap,
            };
            let meta = StreamMeta::new(1, Direction::Up, "trickle", "-");
            let _ = streams.send(StreamHandle::new(meta, reader)).await;
            Ok(())
        }
    }

    /// Writes each line record after a pause.
    struct SlowLines(Duration);

    impl OutputFormat for SlowLines {
        fn write_records(&mut self, records: &mut mpsc::Receiver<Arc<Record>>, out: &mut dyn Write) -> std::io::Result<()> {
            while let Some(record) = records.blocking_recv() {
                std::thread::sleep(self.0);
                if let Record::Line(line) = record.as_ref() {
                    writeln!(out, "{line}")?;
                }
            }
            Ok(())
        }
    }

    /// Collects bytes; closing can be made to hang.
    #[derive(Clone, Default)]
    struct Collect {
        buf: Arc<Mutex<Vec<u8>>>,
        closed: Arc<Mutex<bool>>,
        close_delay: Duration,
    }

    impl Collect {
        fn lines(&self) -> Vec<String> {
            let text = String::from_utf8(self.buf.lock().clone()).unwrap();
            let mut lines: Vec<_> = text.lines().map(str::to_string).collect();
            lines.sort_by_key(|l| l.parse::<usize>().unwrap());
            lines
        }
    }

    impl Write for Collect {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.buf.lock().extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SinkWriter for Collect {
        fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors> {
            std::thread::sleep(self.close_delay);
            *self.closed.lock() = true;
            Ok(())
        }
    }

    fn trickle_input(lines: usize, gap: Duration) -> Input {
        Input::new(
            "trickle|lines",
            Box::new(TrickleSource { lines, gap }),
            vec![],
            Box::new(LinesFormat),
        )
    }

    fn output(sink: &Collect, delay: Duration) -> Output {
        Output::new("slow|collect", Box::new(SlowLines(delay)), vec![], Box::new(sink.clone())).unwrap()
    }

    // Test 2: Records produced after the input is cancelled still reach
    // every output while the drain lasts
    #[tokio::test(flavor = "multi_thread")]
    async fn test_drain_delivers_late_records() {
        let sinks = [Collect::default(), Collect::default()];
        let outputs = sinks.iter().map(|s| output(s, Duration::from_millis(5))).collect();
        let config = FlowConfig {
            run_for: Some(Duration::from_millis(50)),
            drain: Duration::from_secs(5),
            shutdown: Duration::from_secs(5),
        };
        let flow = Flow::new(trickle_input(10, Duration::from_millis(20)), outputs, config).unwrap();

        let (errors, _errors_rx) = ErrorReporter::channel();
        let stats = flow.run(CancellationToken::new(), errors).await;

        assert_eq!(stats.records + stats.drained_records, 10);
        assert!(stats.drained_records > 0, "{stats:?}");
        assert_eq!(stats.outputs_timed_out, 0);
        let expected: Vec<String> = (0..10).map(|n| n.to_string()).collect();
        for sink in &sinks {
            assert_eq!(sink.lines(), expected);
            assert!(*sink.closed.lock());
        }
    }

    // Test 3: An output that cannot close within the shutdown period is
    // counted and does not hold up the others
    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_deadline() {
        let healthy = Collect::default();
        let stuck = Collect {
            close_delay: Duration::from_millis(500),
            ..Default::default()
        };
        let config = FlowConfig {
            run_for: None,
            drain: Duration::from_millis(100),
            shutdown: Duration::from_millis(100),
        };
        let outputs = vec![output(&healthy, Duration::ZERO), output(&stuck, Duration::ZERO)];
        let flow = Flow::new(trickle_input(3, Duration::ZERO), outputs, config).unwrap();

        let (errors, _errors_rx) = ErrorReporter::channel();
        let started = Instant::now();
        let stats = flow.run(CancellationToken::new(), errors).await;

        assert!(started.elapsed() < Duration::from_millis(450));
        assert_eq!(stats.outputs_timed_out, 1);
        assert_eq!(healthy.lines(), ["0", "1", "2"]);
        assert!(*healthy.closed.lock());
        assert!(!*stuck.closed.lock());
        // The stuck output still received every record before closing
        assert_eq!(stuck.lines(), ["0", "1", "2"]);
    }

    #[test]
    fn test_flow_config_default() {
        let config = FlowConfig::default();
        assert!(config.run_for.is_none());
        assert!(config.drain < config.shutdown);
    }
}
