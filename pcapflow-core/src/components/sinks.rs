use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use tracing::{debug, info};

use super::ComponentConfig;
use crate::error::{CloseErrors, Error, Result};
use crate::io::{put_object, CloudLocation};
use crate::pipeline::SinkWriter;

fn invalid(reason: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, reason))
}

/// Standard output.
pub struct StdoutSink {
    out: io::Stdout,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self { out: io::stdout() }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for StdoutSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.out.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

impl SinkWriter for StdoutSink {
    fn close(mut self: Box<Self>) -> std::result::Result<(), CloseErrors> {
        let mut errors = CloseErrors::new();
        errors.push("stdout", self.out.flush());
        errors.into_result()
    }
}

/// A local file, created or truncated when the sink is built.
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        debug!(path = %path.display(), "file sink opened");
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn from_config(config: &ComponentConfig) -> Result<Self> {
        let path = config
            .output_path
            .as_ref()
            .ok_or_else(|| invalid("no output path configured".into()))?;
        Self::create(path)
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl SinkWriter for FileSink {
    fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors> {
        let Self { path, writer } = *self;
        let mut errors = CloseErrors::new();
        match writer.into_inner() {
            Ok(file) => errors.push("file", file.sync_all()),
            Err(e) => errors.push("file", Err(e.into_error())),
        }
        debug!(path = %path.display(), "file sink closed");
        errors.into_result()
    }
}

/// Buffers everything written and uploads it as one object on close.
pub struct ObjectStoreSink {
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    buf: Vec<u8>,
}

impl ObjectStoreSink {
    pub fn new(store: Arc<dyn ObjectStore>, path: ObjectPath) -> Self {
        Self {
            store,
            path,
            buf: Vec::new(),
        }
    }

    /// Build from the configured object URL, which must use `scheme`.
    pub fn from_config(config: &ComponentConfig, scheme: &str) -> Result<Self> {
        let url = config
            .object_url
            .as_deref()
            .ok_or_else(|| invalid(format!("no {scheme}:// destination configured")))?;

        let mut location = CloudLocation::parse(url)?.with_anonymous(config.object_anonymous);
        if location.scheme() != scheme {
            return Err(invalid(format!("{url} is not a {scheme}:// URL")));
        }
        if let Some(endpoint) = &config.object_endpoint {
            location = location.with_endpoint(endpoint.clone());
        }

        let store = location.build_store()?;
        Ok(Self::new(store, location.object_path()))
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }
}

impl Write for ObjectStoreSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SinkWriter for ObjectStoreSink {
    fn close(self: Box<Self>) -> std::result::Result<(), CloseErrors> {
        let Self { store, path, buf } = *self;
        let size = buf.len();
        let mut errors = CloseErrors::new();
        let uploaded = put_object(&store, &path, buf);
        if uploaded.is_ok() {
            info!(%path, size, "object uploaded");
        }
        errors.push("object store", uploaded);
        errors.into_result()
    }
}
