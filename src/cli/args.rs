//! Command-line argument definitions.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use pcapflow_core::{CaptureInput, ComponentConfig, FlowConfig};

/// Reassemble TCP streams from packet captures, correlate HTTP exchanges and
/// ship them through pipelines.
#[derive(Parser, Debug)]
#[command(name = "pcapflow")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Input pipeline, e.g. "tcp|http"
    #[arg(short = 'i', long = "input", value_name = "PIPELINE")]
    pub input: Option<String>,

    /// Output pipeline, e.g. "json|gzip|stdout"; may be repeated
    #[arg(short = 'o', long = "output", value_name = "PIPELINE")]
    pub outputs: Vec<String>,

    /// Capture replayed by the tcp source ("-" for stdin)
    #[arg(short = 'r', long = "capture", value_name = "PCAP")]
    pub capture: Option<String>,

    /// File streamed by the file source; may be repeated
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Complete flows idle this long in capture time
    #[arg(long = "idle-timeout", value_parser = parse_duration, default_value = "120s")]
    pub idle_timeout: Duration,

    /// How often finished connections are pruned
    #[arg(long = "prune-interval", value_parser = parse_duration, default_value = "5s")]
    pub prune_interval: Duration,

    /// How long a request waits for its response
    #[arg(long = "correlation-timeout", value_parser = parse_duration, default_value = "30s")]
    pub correlation_timeout: Duration,

    /// Sweep interval of the correlation cache (default: timeout / 4)
    #[arg(long = "sweep-interval", value_parser = parse_duration)]
    pub sweep_interval: Option<Duration>,

    /// Command every HTTP message is passed through
    #[arg(long = "middleware", value_name = "COMMAND")]
    pub middleware: Option<String>,

    /// Largest accepted HTTP header block
    #[arg(long = "header-limit", value_parser = parse_size, default_value = "64KiB")]
    pub header_limit: usize,

    /// Destination of the file sink
    #[arg(long = "output-file", value_name = "PATH")]
    pub output_file: Option<PathBuf>,

    /// Destination of the gcs and s3 sinks (gs://bucket/key, s3://bucket/key)
    #[arg(long = "object-url", value_name = "URL")]
    pub object_url: Option<String>,

    /// Custom endpoint for S3-compatible stores
    #[arg(long = "object-endpoint", value_name = "URL")]
    pub object_endpoint: Option<String>,

    /// Do not sign object store requests
    #[arg(long = "object-anonymous")]
    pub object_anonymous: bool,

    /// Compression level of the gzip and zstd output modifiers
    #[arg(long = "compression-level", default_value = "6", value_parser = clap::value_parser!(u32).range(0..=22))]
    pub compression_level: u32,

    /// Stop after this long
    #[arg(long = "run-for", value_parser = parse_duration)]
    pub run_for: Option<Duration>,

    /// Grace period for in-flight input at shutdown
    #[arg(long = "drain", value_parser = parse_duration, default_value = "2s")]
    pub drain: Duration,

    /// Upper bound on waiting for outputs to close
    #[arg(long = "shutdown", value_parser = parse_duration, default_value = "10s")]
    pub shutdown: Duration,

    /// List registered pipeline components
    #[arg(long = "list-components")]
    pub list_components: bool,

    /// Enable verbose output
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Args {
    pub fn component_config(&self) -> ComponentConfig {
        ComponentConfig {
            capture: self.capture.as_deref().map(CaptureInput::parse),
            files: self.files.clone(),
            idle_timeout: self.idle_timeout,
            prune_interval: self.prune_interval,
            correlation_timeout: self.correlation_timeout,
            sweep_interval: self.sweep_interval,
            middleware: self.middleware.clone(),
            header_limit: self.header_limit,
            output_path: self.output_file.clone(),
            object_url: self.object_url.clone(),
            object_endpoint: self.object_endpoint.clone(),
            object_anonymous: self.object_anonymous,
            compression_level: self.compression_level,
        }
    }

    pub fn flow_config(&self) -> FlowConfig {
        FlowConfig {
            run_for: self.run_for,
            drain: self.drain,
            shutdown: self.shutdown,
        }
    }
}

/// Parse `500ms`, `2s`, `5m`, `1h` or a bare number of seconds.
pub fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let number: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{value}'"))?;
    let seconds = match unit.trim() {
        "" | "s" => number,
        "ms" => number / 1000.0,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        other => return Err(format!("unknown duration unit '{other}' in '{value}'")),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration '{value}': {e}"))
}

/// Parse a byte size such as `4096`, `64k`, `64KiB` or `1MiB`.
pub fn parse_size(value: &str) -> Result<usize, String> {
    let value = value.trim();
    let split = value
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);

    let number: usize = number
        .parse()
        .map_err(|_| format!("invalid size '{value}'"))?;
    let multiplier = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        other => return Err(format!("unknown size unit '{other}' in '{value}'")),
    };
    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("size '{value}' is too large"))
}
