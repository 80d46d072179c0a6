use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{OutputFormat, OutputModifier, SinkWriter, RECORD_QUEUE};
use crate::error::{CloseErrors, PipelineError, Result};
use crate::message::Record;

struct Parts {
    records: mpsc::Receiver<Arc<Record>>,
    format: Box<dyn OutputFormat>,
    writer: Box<dyn SinkWriter>,
}

/// An output format writing through a modifier chain into a sink.
pub struct Output {
    line: String,
    modifier_count: usize,
    tx: Mutex<Option<mpsc::Sender<Arc<Record>>>>,
    parts: Mutex<Option<Parts>>,
}

impl Output {
    /// Build the writer chain. `modifiers` are given in declaration order;
    /// the first one declared ends up outermost.
    pub fn new(
        line: impl Into<String>,
        format: Box<dyn OutputFormat>,
        modifiers: Vec<Box<dyn OutputModifier>>,
        sink: Box<dyn SinkWriter>,
    ) -> Result<Self> {
        let mut writer = sink;
        for modifier in modifiers.iter().rev() {
            writer = modifier.wrap(writer)?;
        }

        let (tx, records) = mpsc::channel(RECORD_QUEUE);
        Ok(Self {
            line: line.into(),
            modifier_count: modifiers.len(),
            tx: Mutex::new(Some(tx)),
            parts: Mutex::new(Some(Parts {
                records,
                format,
                writer,
            })),
        })
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn modifier_count(&self) -> usize {
        self.modifier_count
    }

    /// Queue a record for the format. Waits while the queue is full.
    pub async fn write(&self, record: Arc<Record>) -> Result<()> {
        let tx = self.tx.lock().clone();
        let closed = || PipelineError::OutputClosed {
            output: self.line.clone(),
        };
        match tx {
            Some(tx) => tx.send(record).await.map_err(|_| closed().into()),
            None => Err(closed().into()),
        }
    }

    /// Stop accepting records. Queued records are still written.
    pub fn close(&self) {
        self.tx.lock().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().is_none()
    }

    /// Run the format on a blocking thread until the output is closed, then
    /// close the writer chain.
    ///
    /// `cancel` closes the output. Close errors from every layer are
    /// collected into one error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let Some(parts) = self.parts.lock().take() else {
            return Ok(());
        };

        let line = self.line.clone();
        let mut task = tokio::task::spawn_blocking(move || write_then_close(&line, parts));

        let joined = tokio::select! {
            joined = &mut task => joined,
            _ = cancel.cancelled() => {
                self.close();
                task.await
            }
        };
        // Nothing may be queued once the writer is gone
        self.close();

        let errors = joined.map_err(std::io::Error::other)?;
        errors.into_result().map_err(|e| PipelineError::Close(e).into())
    }
}

fn write_then_close(line: &str, parts: Parts) -> CloseErrors {
    let Parts {
        mut records,
        mut format,
        mut writer,
    } = parts;

    let mut errors = CloseErrors::new();
    let written = format
        .write_records(&mut records, &mut writer)
        .and_then(|_| writer.flush());
    errors.push("format", written);
    drop(records);

    errors.extend(writer.close());
    debug!(output = %line, failures = errors.len(), "output closed");
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::io;

    /// Sink that shares its buffer so tests can inspect it after close.
    #[derive(Clone, Default)]
    struct SharedSink {
        buf: Arc<Mutex<Vec<u8>>>,
        closed: Arc<Mutex<bool>>,
        fail_close: bool,
    }

    impl Write for SharedSink {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.lock().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SinkWriter for SharedSink {
        fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors> {
            *self.closed.lock() = true;
            let mut errors = CloseErrors::new();
            if self.fail_close {
                errors.push("sink", Err("refused"));
            }
            errors.into_result()
        }
    }

    /// Writes each line record followed by a newline.
    struct Plain;

    impl OutputFormat for Plain {
        fn write_records(
            &mut self,
            records: &mut mpsc::Receiver<Arc<Record>>,
            out: &mut dyn Write,
        ) -> io::Result<()> {
            while let Some(record) = records.blocking_recv() {
                if let Record::Line(line) = &*record {
                    writeln!(out, "{line}")?;
                }
            }
            Ok(())
        }
    }

    /// Brackets everything written through it.
    struct Bracket(&'static str);

    struct BracketWriter {
        tag: &'static str,
        inner: Box<dyn SinkWriter>,
    }

    impl Write for BracketWriter {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            write!(self.inner, "{}(", self.tag)?;
            self.inner.write_all(data)?;
            write!(self.inner, ")")?;
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.inner.flush()
        }
    }

    impl SinkWriter for BracketWriter {
        fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors> {
            let mut errors = CloseErrors::new();
            errors.push(self.tag, Err("layer failed"));
            errors.extend(self.inner.close());
            errors.into_result()
        }
    }

    impl OutputModifier for Bracket {
        fn wrap(&self, inner: Box<dyn SinkWriter>) -> Result<Box<dyn SinkWriter>> {
            Ok(Box::new(BracketWriter { tag: self.0, inner }))
        }
    }

    fn line(s: &str) -> Arc<Record> {
        Arc::new(Record::Line(s.to_string()))
    }

    // Test 1: Records written before cancel reach the sink
    #[tokio::test]
    async fn test_output_writes_and_closes() {
        let sink = SharedSink::default();
        let output = Arc::new(Output::new("plain|test", Box::new(Plain), vec![], Box::new(sink.clone())).unwrap());
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let output = output.clone();
            let cancel = cancel.clone();
            async move { output.run(cancel).await }
        });

        output.write(line("one")).await.unwrap();
        output.write(line("two")).await.unwrap();
        cancel.cancel();
        run.await.unwrap().unwrap();

        assert_eq!(&*sink.buf.lock(), b"one\ntwo\n");
        assert!(*sink.closed.lock());
        assert!(output.is_closed());
    }

    // Test 2: Write after close fails
    #[tokio::test]
    async fn test_write_after_close() {
        let output = Output::new("plain|test", Box::new(Plain), vec![], Box::new(SharedSink::default())).unwrap();
        output.close();
        let err = output.write(line("late")).await.unwrap_err();
        assert!(matches!(err, Error::Pipeline(PipelineError::OutputClosed { .. })));
    }

    // Test 3: First declared modifier is outermost
    #[tokio::test]
    async fn test_modifier_order() {
        let sink = SharedSink::default();
        let output = Output::new(
            "plain|a|b|test",
            Box::new(Plain),
            vec![Box::new(Bracket("a")), Box::new(Bracket("b"))],
            Box::new(sink.clone()),
        )
        .unwrap();

        output.write(line("x")).await.unwrap();
        output.close();
        let err = output.run(CancellationToken::new()).await.unwrap_err();

        // "x\n" is written once by Plain's writeln!
        let written = String::from_utf8(sink.buf.lock().clone()).unwrap();
        assert!(written.starts_with("b(a("), "{written}");

        // Every layer was closed despite the failures
        assert!(*sink.closed.lock());
        match err {
            Error::Pipeline(PipelineError::Close(errors)) => {
                assert_eq!(errors.messages(), ["a: layer failed", "b: layer failed"]);
            }
            other => panic!("unexpected {other}"),
        }
    }

    // Test 4: Sink close failure is returned
    #[tokio::test]
    async fn test_sink_close_failure() {
        let sink = SharedSink {
            fail_close: true,
            ..Default::default()
        };
        let output = Output::new("plain|test", Box::new(Plain), vec![], Box::new(sink)).unwrap();
        output.close();
        let err = output.run(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("sink: refused"));
    }
}
