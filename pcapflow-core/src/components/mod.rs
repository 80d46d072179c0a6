//! Builtin pipeline components.
//!
//! | kind | names |
//! |------|-------|
//! | source | `tcp`, `file`, `stdin` |
//! | input modifier | `gunzip`, `unzstd`, `decompress` |
//! | input format | `http`, `lines` |
//! | output format | `json`, `text`, `stats` |
//! | output modifier | `gzip`, `zstd` |
//! | sink | `stdout`, `file`, `gcs`, `s3` |

mod input_formats;
mod modifiers;
mod output_formats;
mod sinks;
mod sources;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::correlate::default_sweep;
use crate::pipeline::Registry;
use crate::stream::parsers::DEFAULT_HEADER_LIMIT;

pub use input_formats::{HttpFormat, LinesFormat};
pub use modifiers::{Decompress, GzipModifier};
#[cfg(feature = "compress-zstd")]
pub use modifiers::ZstdModifier;
pub use output_formats::{JsonFormat, StatsFormat, TextFormat};
pub use sinks::{FileSink, ObjectStoreSink, StdoutSink};
pub use sources::{CaptureInput, FileSource, StdinSource, TcpSource};

/// Settings shared by the builtin component constructors.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    /// Capture replayed by the `tcp` source.
    pub capture: Option<CaptureInput>,
    /// Files streamed by the `file` source.
    pub files: Vec<PathBuf>,
    /// Flows without a segment for this long (capture time) are completed.
    pub idle_timeout: Duration,
    /// How often completed connections are pruned.
    pub prune_interval: Duration,
    /// How long a request waits for its response.
    pub correlation_timeout: Duration,
    /// Sweep interval of the correlation cache; derived from the timeout
    /// when unset.
    pub sweep_interval: Option<Duration>,
    /// Command run as message-rewrite middleware by the `http` format.
    pub middleware: Option<String>,
    pub header_limit: usize,
    /// Destination of the `file` sink.
    pub output_path: Option<PathBuf>,
    /// `s3://` or `gs://` destination of the object store sinks.
    pub object_url: Option<String>,
    /// Custom endpoint for S3-compatible stores.
    pub object_endpoint: Option<String>,
    pub object_anonymous: bool,
    pub compression_level: u32,
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            capture: None,
            files: Vec::new(),
            idle_timeout: Duration::from_secs(120),
            prune_interval: Duration::from_secs(5),
            correlation_timeout: Duration::from_secs(30),
            sweep_interval: None,
            middleware: None,
            header_limit: DEFAULT_HEADER_LIMIT,
            output_path: None,
            object_url: None,
            object_endpoint: None,
            object_anonymous: false,
            compression_level: 6,
        }
    }
}

impl ComponentConfig {
    pub fn sweep_interval(&self) -> Duration {
        self.sweep_interval
            .unwrap_or_else(|| default_sweep(self.correlation_timeout))
    }
}

/// Registry holding every builtin component, configured from `config`.
pub fn builtin_registry(config: &ComponentConfig) -> Registry {
    let config = Arc::new(config.clone());
    let mut registry = Registry::new();

    let c = config.clone();
    registry.register_source("tcp", move || Ok(Box::new(TcpSource::from_config(&c)?)));
    let c = config.clone();
    registry.register_source("file", move || Ok(Box::new(FileSource::from_config(&c)?)));
    registry.register_source("stdin", || Ok(Box::new(StdinSource)));

    registry.register_input_modifier("gunzip", || Ok(Box::new(Decompress::gzip())));
    #[cfg(feature = "compress-zstd")]
    registry.register_input_modifier("unzstd", || Ok(Box::new(Decompress::zstd())));
    registry.register_input_modifier("decompress", || Ok(Box::new(Decompress::detect())));

    let c = config.clone();
    registry.register_input_format("http", move || Ok(Box::new(HttpFormat::from_config(&c))));
    registry.register_input_format("lines", || Ok(Box::new(LinesFormat)));

    registry.register_output_format("json", || Ok(Box::new(JsonFormat)));
    registry.register_output_format("text", || Ok(Box::new(TextFormat)));
    registry.register_output_format("stats", || Ok(Box::new(StatsFormat::default())));

    let level = config.compression_level;
    registry.register_output_modifier("gzip", move || Ok(Box::new(GzipModifier::new(level))));
    #[cfg(feature = "compress-zstd")]
    registry.register_output_modifier("zstd", move || Ok(Box::new(ZstdModifier::new(level as i32))));

    registry.register_sink("stdout", || Ok(Box::new(StdoutSink::new())));
    let c = config.clone();
    registry.register_sink("file", move || Ok(Box::new(FileSink::from_config(&c)?)));
    let c = config.clone();
    registry.register_sink("gcs", move || Ok(Box::new(ObjectStoreSink::from_config(&c, "gs")?)));
    let c = config;
    registry.register_sink("s3", move || Ok(Box::new(ObjectStoreSink::from_config(&c, "s3")?)));

    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::ComponentKind;

    // Test 1: Every builtin is registered under its name
    #[test]
    fn test_builtin_names() {
        let registry = builtin_registry(&ComponentConfig::default());
        assert_eq!(registry.names(ComponentKind::Source), ["file", "stdin", "tcp"]);
        assert_eq!(registry.names(ComponentKind::InputFormat), ["http", "lines"]);
        assert_eq!(registry.names(ComponentKind::OutputFormat), ["json", "stats", "text"]);
        assert_eq!(registry.names(ComponentKind::Sink), ["file", "gcs", "s3", "stdout"]);
        assert!(registry.contains(ComponentKind::InputModifier, "gunzip"));
        assert!(registry.contains(ComponentKind::OutputModifier, "gzip"));
    }

    // Test 2: Constructors that need settings fail without them
    #[test]
    fn test_missing_settings_fail_construction() {
        let registry = builtin_registry(&ComponentConfig::default());
        let err = registry.source("tcp").err().unwrap();
        assert!(err.to_string().contains("failed to build source 'tcp'"));
        assert!(registry.sink("file").is_err());
        assert!(registry.sink("gcs").is_err());
    }

    #[test]
    fn test_sweep_interval_default() {
        let config = ComponentConfig {
            correlation_timeout: Duration::from_secs(8),
            ..Default::default()
        };
        assert_eq!(config.sweep_interval(), Duration::from_secs(2));
    }
}
