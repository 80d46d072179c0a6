use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ComponentConfig;
use crate::error::{Error, Result};
use crate::pcap::{decode_tcp, PcapReader};
use crate::pipeline::Source;
use crate::stream::{Assembler, AssemblerStats, ConnectionTracker, Direction, StreamHandle, StreamMeta};

/// Where a capture is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput {
    Path(PathBuf),
    Stdin,
}

impl CaptureInput {
    /// `-` means standard input.
    pub fn parse(value: &str) -> Self {
        if value == "-" {
            CaptureInput::Stdin
        } else {
            CaptureInput::Path(PathBuf::from(value))
        }
    }

    pub fn open(&self) -> Result<PcapReader> {
        match self {
            CaptureInput::Path(path) => PcapReader::open(path),
            CaptureInput::Stdin => PcapReader::from_reader(std::io::stdin()),
        }
    }
}

impl fmt::Display for CaptureInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureInput::Path(path) => write!(f, "{}", path.display()),
            CaptureInput::Stdin => f.write_str("-"),
        }
    }
}

/// Replays a capture through the reassembler and publishes one stream per
/// direction of every TCP connection.
///
/// Idle flows are completed by capture time; completed connections are
/// pruned on a wall-clock interval.
pub struct TcpSource {
    capture: CaptureInput,
    idle_timeout: Duration,
    prune_interval: Duration,
}

impl TcpSource {
    pub fn new(capture: CaptureInput, idle_timeout: Duration, prune_interval: Duration) -> Self {
        Self {
            capture,
            idle_timeout,
            prune_interval,
        }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self> {
        let capture = config.capture.clone().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no capture configured",
            ))
        })?;
        Ok(Self::new(capture, config.idle_timeout, config.prune_interval))
    }
}

#[async_trait]
impl Source for TcpSource {
    async fn run(&self, cancel: CancellationToken, streams: mpsc::Sender<StreamHandle>) -> Result<()> {
        let (tracker, mut published) = ConnectionTracker::new();

        let capture = self.capture.clone();
        let idle = self.idle_timeout;
        let replay_tracker = tracker.clone();
        let replay_cancel = cancel.clone();
        let mut replay_task = tokio::task::spawn_blocking(move || {
            let result = replay(&capture, &replay_tracker, idle, &replay_cancel);
            // Ends the published queue once everything queued is taken
            replay_tracker.close();
            result
        });

        let mut prune = tokio::time::interval(self.prune_interval);
        prune.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut replayed = None;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                stream = published.recv() => match stream {
                    Some(stream) => {
                        if streams.send(stream).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = prune.tick() => {
                    tracker.prune();
                }
                joined = &mut replay_task, if replayed.is_none() => {
                    replayed = Some(joined);
                }
            }
        }

        let joined = match replayed {
            Some(joined) => joined,
            None if cancel.is_cancelled() => {
                // The replay may be stuck in a read; stop publishing and
                // let it finish on its own
                tracker.close();
                tracker.prune();
                let capture = self.capture.to_string();
                tokio::spawn(async move {
                    if let Ok(Err(e)) = replay_task.await {
                        debug!(%capture, error = %e, "capture replay failed after cancel");
                    }
                });
                info!(capture = %self.capture, "capture replay abandoned");
                return Ok(());
            }
            None => replay_task.await,
        };
        tracker.prune();
        let stats = joined.map_err(std::io::Error::other)??;
        info!(
            capture = %self.capture,
            segments = stats.segments,
            flows = stats.flows_created,
            live_connections = tracker.len(),
            "capture replayed"
        );
        Ok(())
    }
}

fn replay(
    capture: &CaptureInput,
    tracker: &Arc<ConnectionTracker>,
    idle: Duration,
    cancel: &CancellationToken,
) -> Result<AssemblerStats> {
    let reader = capture.open()?;
    let mut assembler = Assembler::new(tracker.clone());
    let idle_us = idle.as_micros() as i64;
    let flush_every = (idle_us / 4).max(1);
    let mut next_flush: Option<i64> = None;
    let mut skipped = 0u64;

    for packet in reader {
        if cancel.is_cancelled() {
            debug!("capture replay cancelled");
            break;
        }
        let packet = packet?;
        let Some(segment) = decode_tcp(packet.link_type, &packet.data, packet.timestamp_us) else {
            skipped += 1;
            continue;
        };
        assembler.process(&segment);

        let now = packet.timestamp_us;
        match next_flush {
            Some(at) if now >= at => {
                let flushed = assembler.flush_older_than(now - idle_us);
                if flushed > 0 {
                    debug!(flushed, open = assembler.open_flows(), "completed idle flows");
                }
                next_flush = Some(now + flush_every);
            }
            Some(_) => {}
            None => next_flush = Some(now + flush_every),
        }
    }

    let remaining = assembler.flush_all();
    debug!(remaining, skipped, "capture finished");
    Ok(assembler.stats().clone())
}

/// One stream per configured file.
pub struct FileSource {
    paths: Vec<PathBuf>,
}

impl FileSource {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self> {
        if config.files.is_empty() {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "no input files configured",
            )));
        }
        Ok(Self::new(config.files.clone()))
    }
}

#[async_trait]
impl Source for FileSource {
    async fn run(&self, cancel: CancellationToken, streams: mpsc::Sender<StreamHandle>) -> Result<()> {
        for (index, path) in self.paths.iter().enumerate() {
            if cancel.is_cancelled() {
                break;
            }
            let file = File::open(path).map_err(|e| {
                warn!(path = %path.display(), error = %e, "cannot open input file");
                e
            })?;
            let meta = StreamMeta::new(index as u64 + 1, Direction::Up, path.display().to_string(), "-");
            if streams.send(StreamHandle::new(meta, file)).await.is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// A single stream over standard input.
pub struct StdinSource;

#[async_trait]
impl Source for StdinSource {
    async fn run(&self, cancel: CancellationToken, streams: mpsc::Sender<StreamHandle>) -> Result<()> {
        let meta = StreamMeta::new(1, Direction::Up, "stdin", "-");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => debug!("stdin source cancelled"),
            _ = streams.send(StreamHandle::new(meta, std::io::stdin())) => {}
        }
        Ok(())
    }
}
