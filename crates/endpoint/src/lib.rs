//! Remote endpoints that accept parts and assemble them into objects.
//!
//! A [`RemoteEndpoint`] is chosen at construction time; the coordinator
//! only sees the trait. Three backends ship here:
//!
//! - [`LocalEndpoint`]: a directory on this machine.
//! - [`HostEndpoint`]: a `chunkferry receive` peer reached over TCP.
//! - [`ObjectStoreEndpoint`]: an S3-compatible multipart upload API.

mod error;
mod host;
mod local;
mod object_store;

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use chunkferry_protocol::{FinalizedObject, Part, PartReceipt};
use tokio_util::sync::CancellationToken;

pub use error::EndpointError;
pub use host::HostEndpoint;
pub use local::LocalEndpoint;
pub use object_store::ObjectStoreEndpoint;

/// Boxed future returned by endpoint operations.
pub type EndpointFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EndpointError>> + Send + 'a>>;

/// A backend that stores parts and assembles them into one object.
///
/// Implementations must be safe to share between concurrent uploads.
pub trait RemoteEndpoint: Send + Sync {
    /// Human-readable name used in logs and journals.
    fn name(&self) -> &str;

    /// Returns `true` if a finalized object exists at `key`.
    fn exists<'a>(&'a self, key: &'a str) -> EndpointFuture<'a, bool>;

    /// Uploads one part. `data` must be exactly `part.length` bytes.
    fn upload_part<'a>(
        &'a self,
        key: &'a str,
        part: &'a Part,
        data: &'a [u8],
    ) -> EndpointFuture<'a, PartReceipt>;

    /// Assembles the parts named by `receipts` into the object at `key`.
    ///
    /// Fails with `IncompleteUpload` if the receipts do not describe a
    /// contiguous run of stored parts starting at index 0.
    fn finalize<'a>(
        &'a self,
        key: &'a str,
        receipts: &'a [PartReceipt],
    ) -> EndpointFuture<'a, FinalizedObject>;

    /// Returns the receipt of `part` if the backend already holds it.
    ///
    /// Used to avoid re-sending a part whose earlier attempt may have
    /// landed. Backends that cannot tell return `Ok(None)`.
    fn committed_part<'a>(
        &'a self,
        _key: &'a str,
        _part: &'a Part,
    ) -> EndpointFuture<'a, Option<PartReceipt>> {
        Box::pin(async { Ok(None) })
    }
}

/// Where to send parts, as written on the command line.
///
/// ```text
/// local:<dir>
/// host:<addr:port>
/// s3:<base-url>/<bucket>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndpointSpec {
    Local(PathBuf),
    Host(String),
    ObjectStore { base_url: String, bucket: String },
}

impl FromStr for EndpointSpec {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (scheme, rest) = s
            .split_once(':')
            .ok_or_else(|| EndpointError::invalid_request(format!("endpoint needs a scheme: {s}")))?;
        if rest.is_empty() {
            return Err(EndpointError::invalid_request(format!(
                "endpoint has no target: {s}"
            )));
        }
        match scheme {
            "local" => Ok(Self::Local(PathBuf::from(rest))),
            "host" => Ok(Self::Host(rest.to_string())),
            "s3" => {
                let rest = rest.trim_end_matches('/');
                let (base_url, bucket) = rest
                    .rsplit_once('/')
                    .filter(|(base, bucket)| base.contains("://") && !bucket.is_empty())
                    .ok_or_else(|| {
                        EndpointError::invalid_request(format!(
                            "object store endpoint must be s3:<base-url>/<bucket>: {s}"
                        ))
                    })?;
                Ok(Self::ObjectStore {
                    base_url: base_url.to_string(),
                    bucket: bucket.to_string(),
                })
            }
            other => Err(EndpointError::invalid_request(format!(
                "unknown endpoint scheme: {other}"
            ))),
        }
    }
}

/// Credentials and limits applied when opening an endpoint.
#[derive(Debug, Clone, Default)]
pub struct EndpointOptions {
    /// Shared token for `host:` endpoints.
    pub token: Option<String>,
    /// `Authorization` header value for `s3:` endpoints.
    pub authorization: Option<String>,
    /// Byte quota for `local:` endpoints.
    pub quota_bytes: Option<u64>,
}

/// Builds the endpoint described by `spec`.
pub fn open(
    spec: &EndpointSpec,
    options: &EndpointOptions,
    cancel: CancellationToken,
) -> Result<Arc<dyn RemoteEndpoint>, EndpointError> {
    match spec {
        EndpointSpec::Local(dir) => Ok(Arc::new(
            LocalEndpoint::new(dir).with_quota(options.quota_bytes),
        )),
        EndpointSpec::Host(addr) => {
            let token = options
                .token
                .clone()
                .ok_or_else(|| EndpointError::auth("host endpoints need a token"))?;
            Ok(Arc::new(HostEndpoint::new(addr.clone(), token, cancel)?))
        }
        EndpointSpec::ObjectStore { base_url, bucket } => Ok(Arc::new(ObjectStoreEndpoint::new(
            base_url,
            bucket,
            options.authorization.as_deref(),
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkferry_protocol::ErrorKind;

    #[test]
    fn parse_specs() {
        assert_eq!(
            "local:/srv/data".parse::<EndpointSpec>().unwrap(),
            EndpointSpec::Local(PathBuf::from("/srv/data"))
        );
        assert_eq!(
            "host:10.0.0.2:7070".parse::<EndpointSpec>().unwrap(),
            EndpointSpec::Host("10.0.0.2:7070".into())
        );
        assert_eq!(
            "s3:https://s3.example.com/backups/"
                .parse::<EndpointSpec>()
                .unwrap(),
            EndpointSpec::ObjectStore {
                base_url: "https://s3.example.com".into(),
                bucket: "backups".into()
            }
        );
    }

    #[test]
    fn reject_bad_specs() {
        for bad in ["", "local:", "ftp:x", "nocolon", "s3:https://host", "s3:bucket"] {
            let err = bad.parse::<EndpointSpec>().unwrap_err();
            assert_eq!(err.kind, ErrorKind::InvalidRequest, "{bad}");
        }
    }

    #[test]
    fn open_host_requires_token() {
        let spec = EndpointSpec::Host("127.0.0.1:1".into());
        let err = open(&spec, &EndpointOptions::default(), CancellationToken::new())
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[test]
    fn open_local() {
        let dir = tempfile::tempdir().unwrap();
        let spec = EndpointSpec::Local(dir.path().to_path_buf());
        let endpoint = open(&spec, &EndpointOptions::default(), CancellationToken::new()).unwrap();
        assert!(endpoint.name().starts_with("local:"));
    }
}
