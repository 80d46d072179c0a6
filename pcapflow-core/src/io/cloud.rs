//! Object storage destinations.
//!
//! Output bound for a bucket is buffered by its sink and uploaded as a
//! single object on close. `s3://` needs the `s3` feature and `gs://` the
//! `gcs` feature; S3-compatible stores are reached through a custom endpoint.

use std::future::Future;
use std::io;
use std::sync::Arc;

use object_store::{path::Path as ObjectPath, ObjectStore, PutPayload};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;
use url::Url;

use crate::error::Error;

const SCHEMES: [&str; 2] = ["s3", "gs"];

fn invalid(reason: String) -> Error {
    Error::Io(io::Error::new(io::ErrorKind::InvalidInput, reason))
}

/// Drive `future` to completion from a blocking sink close.
///
/// Sinks close on blocking-pool threads, or on no runtime at all in tests.
fn block_on<F: Future>(future: F) -> io::Result<F::Output> {
    let Ok(handle) = Handle::try_current() else {
        return Ok(tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(future));
    };
    if handle.runtime_flavor() == RuntimeFlavor::MultiThread {
        Ok(tokio::task::block_in_place(|| handle.block_on(future)))
    } else {
        Ok(handle.block_on(future))
    }
}

/// A bucket and object key parsed from an `s3://` or `gs://` URL.
#[derive(Debug, Clone)]
pub struct CloudLocation {
    url: Url,
    /// Overrides the provider endpoint, for MinIO and friends.
    endpoint: Option<String>,
    /// Send unsigned requests.
    anonymous: bool,
}

impl CloudLocation {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let url = Url::parse(raw).map_err(|e| invalid(format!("bad object URL {raw}: {e}")))?;
        if !SCHEMES.contains(&url.scheme()) {
            return Err(invalid(format!("object URL {raw} must start with s3:// or gs://")));
        }
        let location = Self {
            url,
            endpoint: None,
            anonymous: false,
        };
        if location.bucket().is_none() || location.key().is_empty() {
            return Err(invalid(format!("object URL {raw} needs a bucket and a key")));
        }
        Ok(location)
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_anonymous(mut self, anonymous: bool) -> Self {
        self.anonymous = anonymous;
        self
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    fn bucket(&self) -> Option<&str> {
        self.url.host_str().filter(|b| !b.is_empty())
    }

    fn key(&self) -> &str {
        self.url.path().trim_start_matches('/')
    }

    pub fn object_path(&self) -> ObjectPath {
        ObjectPath::from(self.key())
    }

    /// Credentials come from the provider's usual environment variables.
    pub fn build_store(&self) -> Result<Arc<dyn ObjectStore>, Error> {
        debug!(
            url = %self.url,
            endpoint = ?self.endpoint,
            anonymous = self.anonymous,
            "building object store"
        );
        #[cfg(any(feature = "s3", feature = "gcs"))]
        let bucket = self.bucket().unwrap_or_default();
        match self.scheme() {
            #[cfg(feature = "s3")]
            "s3" => {
                let mut builder = object_store::aws::AmazonS3Builder::from_env().with_bucket_name(bucket);
                if let Some(endpoint) = &self.endpoint {
                    builder = builder.with_endpoint(endpoint).with_allow_http(true);
                }
                if self.anonymous {
                    builder = builder.with_skip_signature(true);
                }
                Ok(Arc::new(builder.build().map_err(store_error)?))
            }
            #[cfg(feature = "gcs")]
            "gs" => {
                let store = object_store::gcp::GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(bucket)
                    .build()
                    .map_err(store_error)?;
                Ok(Arc::new(store))
            }
            scheme => Err(invalid(format!("{scheme}:// support is not compiled in"))),
        }
    }
}

#[cfg(any(feature = "s3", feature = "gcs"))]
fn store_error(e: object_store::Error) -> Error {
    Error::Io(io::Error::other(format!("cannot set up object store: {e}")))
}

/// Upload `data` as the object at `path`, blocking until it is stored.
pub fn put_object(store: &Arc<dyn ObjectStore>, path: &ObjectPath, data: Vec<u8>) -> io::Result<()> {
    block_on(store.put(path, PutPayload::from(data)))?
        .map(|_| ())
        .map_err(|e| io::Error::other(format!("upload to {path} failed: {e}")))
}
