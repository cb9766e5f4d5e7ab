use std::path::Path;
use std::sync::Arc;

use chunkferry_protocol::{FinalizedObject, Part, PartReceipt};
use chunkferry_transfer::{StagingArea, TransferError, checksum_bytes};

use crate::{EndpointError, EndpointFuture, RemoteEndpoint};

/// Endpoint backed by a local directory.
///
/// Parts are staged next to the destination and assembled on finalize,
/// exactly as a `chunkferry receive` peer does.
pub struct LocalEndpoint {
    name: String,
    staging: Arc<StagingArea>,
}

impl LocalEndpoint {
    pub fn new(root: &Path) -> Self {
        Self {
            name: format!("local:{}", root.display()),
            staging: Arc::new(StagingArea::new(root)),
        }
    }

    /// Limits the bytes stored under the root.
    pub fn with_quota(self, quota_bytes: Option<u64>) -> Self {
        let staging = StagingArea::new(self.staging.root()).with_quota(quota_bytes);
        Self {
            name: self.name,
            staging: Arc::new(staging),
        }
    }

    pub fn root(&self) -> &Path {
        self.staging.root()
    }

    async fn run<T, F>(&self, f: F) -> Result<T, EndpointError>
    where
        F: FnOnce(&StagingArea) -> Result<T, TransferError> + Send + 'static,
        T: Send + 'static,
    {
        let staging = Arc::clone(&self.staging);
        tokio::task::spawn_blocking(move || f(&staging))
            .await
            .map_err(|e| EndpointError::transient(format!("staging task failed: {e}")))?
            .map_err(EndpointError::from)
    }
}

impl RemoteEndpoint for LocalEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists<'a>(&'a self, key: &'a str) -> EndpointFuture<'a, bool> {
        let key = key.to_string();
        Box::pin(async move { self.run(move |s| s.exists(&key)).await })
    }

    fn upload_part<'a>(
        &'a self,
        key: &'a str,
        part: &'a Part,
        data: &'a [u8],
    ) -> EndpointFuture<'a, PartReceipt> {
        Box::pin(async move {
            if data.len() as u64 != part.length {
                return Err(EndpointError::invalid_request(format!(
                    "part {} is {} bytes, got {}",
                    part.sequence_index,
                    part.length,
                    data.len()
                )));
            }
            let key = key.to_string();
            let part = part.clone();
            let data = data.to_vec();
            self.run(move |s| {
                let checksum = checksum_bytes(&data);
                s.stage_part(&key, &part, &data, &checksum)
            })
            .await
        })
    }

    fn finalize<'a>(
        &'a self,
        key: &'a str,
        receipts: &'a [PartReceipt],
    ) -> EndpointFuture<'a, FinalizedObject> {
        let key = key.to_string();
        let receipts = receipts.to_vec();
        Box::pin(async move { self.run(move |s| s.assemble(&key, &receipts)).await })
    }

    fn committed_part<'a>(
        &'a self,
        key: &'a str,
        part: &'a Part,
    ) -> EndpointFuture<'a, Option<PartReceipt>> {
        let key = key.to_string();
        let index = part.sequence_index;
        Box::pin(async move {
            let staged = self.run(move |s| s.staged_part(&key, index)).await?;
            Ok(staged.filter(|r| part.matches_receipt(r)))
        })
    }
}
