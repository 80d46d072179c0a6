use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use super::{Closer, InputContext, InputFormat, InputModifier, Source, StreamDecoder};
use crate::error::{PipelineError, Result};
use crate::stream::StreamHandle;

/// Streams buffered between the source and the input loop.
const STREAM_QUEUE: usize = 64;

/// A source, its modifier chain and the format that decodes its streams.
pub struct Input {
    line: String,
    source: Box<dyn Source>,
    modifiers: Vec<(String, Box<dyn InputModifier>)>,
    format: Box<dyn InputFormat>,
}

impl Input {
    /// `modifiers` are given in declaration order; the first one declared
    /// ends up outermost.
    pub fn new(
        line: impl Into<String>,
        source: Box<dyn Source>,
        modifiers: Vec<(String, Box<dyn InputModifier>)>,
        format: Box<dyn InputFormat>,
    ) -> Self {
        Self {
            line: line.into(),
            source,
            modifiers,
            format,
        }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn modifier_count(&self) -> usize {
        self.modifiers.len()
    }

    /// Start the source and decode every stream it emits, each on its own
    /// blocking task.
    ///
    /// Returns once the source is exhausted and every stream is decoded, or
    /// once `ctx.cancel` fires. Modifier closers run when `ctx.cancel` fires.
    pub async fn run(self, ctx: InputContext) -> Result<()> {
        let decoder = self.format.start(&ctx)?;
        let (stream_tx, mut stream_rx) = mpsc::channel(STREAM_QUEUE);

        let source = self.source;
        let source_cancel = ctx.cancel.clone();
        let source_errors = ctx.errors.clone();
        let source_task = tokio::spawn(async move {
            if let Err(e) = source.run(source_cancel, stream_tx).await {
                source_errors.report(e);
            }
        });

        let mut closers: Vec<Closer> = Vec::new();
        let mut decoders = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => break,
                stream = stream_rx.recv() => {
                    let Some(stream) = stream else { break };
                    let label = stream.meta().to_string();
                    match wrap_stream(&self.modifiers, stream, &mut closers) {
                        Ok(stream) => {
                            let decoder: Arc<dyn StreamDecoder> = decoder.clone();
                            let errors = ctx.errors.clone();
                            decoders.spawn_blocking(move || {
                                if let Err(e) = decoder.decode(stream) {
                                    debug!(stream = %label, error = %e, "stream abandoned");
                                    errors.report(e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!(stream = %label, error = %e, "skipping stream");
                            ctx.errors.report(e);
                        }
                    }
                },
                Some(joined) = decoders.join_next(), if !decoders.is_empty() => {
                    if let Err(e) = joined {
                        warn!(error = %e, "stream decoder panicked");
                    }
                }
            }
        }
        drop(stream_rx);
        if let Err(e) = source_task.await {
            warn!(error = %e, "source task failed");
        }

        // Decoders still running hold the only other handles on the decoder
        drop(decoder);
        while let Some(joined) = decoders.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "stream decoder panicked");
            }
        }
        debug!(input = %self.line, "input exhausted");
        drop(ctx.records);

        if !closers.is_empty() {
            ctx.cancel.cancelled().await;
            for close in closers {
                if let Err(e) = close() {
                    ctx.errors.report(e);
                }
            }
        }
        Ok(())
    }
}

/// Apply modifiers innermost-first so the first declared is outermost.
fn wrap_stream(
    modifiers: &[(String, Box<dyn InputModifier>)],
    mut stream: StreamHandle,
    closers: &mut Vec<Closer>,
) -> Result<StreamHandle> {
    for (name, modifier) in modifiers.iter().rev() {
        let label = stream.meta().to_string();
        let (wrapped, closer) = modifier.wrap(stream).map_err(|e| PipelineError::Wrap {
            modifier: name.clone(),
            stream: label,
            reason: e.to_string(),
        })?;
        stream = wrapped;
        closers.extend(closer);
    }
    Ok(stream)
}
