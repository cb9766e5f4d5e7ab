use std::net::SocketAddr;

use chunkferry_data_channel::{DataChannelError, HostConnection, is_well_formed};
use chunkferry_protocol::{FinalizedObject, Part, PartReceipt};
use chunkferry_transfer::checksum_bytes;
use tokio::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{EndpointError, EndpointFuture, RemoteEndpoint};

/// Endpoint that pushes parts to a `chunkferry receive` peer.
///
/// The connection is opened on first use and reused. After a transport
/// failure it is dropped and re-dialed by the next call, so a retried
/// operation gets a fresh link.
pub struct HostEndpoint {
    name: String,
    addr: String,
    token: String,
    cancel: CancellationToken,
    conn: Mutex<Option<HostConnection>>,
}

impl HostEndpoint {
    pub fn new(
        addr: impl Into<String>,
        token: impl Into<String>,
        cancel: CancellationToken,
    ) -> Result<Self, EndpointError> {
        let addr = addr.into();
        let token = token.into();
        if !is_well_formed(&token) {
            return Err(EndpointError::auth("token must be 32 hex characters"));
        }
        Ok(Self {
            name: format!("host:{addr}"),
            addr,
            token,
            cancel,
            conn: Mutex::new(None),
        })
    }

    /// Says goodbye on the open connection, if any.
    pub async fn close(&self) {
        if let Some(conn) = self.conn.lock().await.take()
            && let Err(e) = conn.close().await
        {
            debug!(addr = %self.addr, error = %e, "close failed");
        }
    }

    async fn resolve(&self) -> Result<SocketAddr, EndpointError> {
        tokio::net::lookup_host(&self.addr)
            .await
            .map_err(|e| EndpointError::transient(format!("resolve {}: {e}", self.addr)))?
            .next()
            .ok_or_else(|| EndpointError::invalid_request(format!("no address for {}", self.addr)))
    }

    /// Locks the shared connection, dialing first if needed.
    async fn connection(&self) -> Result<MutexGuard<'_, Option<HostConnection>>, EndpointError> {
        let mut guard = self.conn.lock().await;
        if guard.as_ref().is_some_and(HostConnection::is_stale) {
            // An earlier call was dropped mid-exchange; its reply is still queued.
            debug!(addr = %self.addr, "replacing host connection left mid-request");
            *guard = None;
        }
        if guard.is_none() {
            let addr = self.resolve().await?;
            let conn = HostConnection::connect(addr, &self.token, self.cancel.clone()).await?;
            *guard = Some(conn);
        }
        Ok(guard)
    }

    /// Converts a request outcome, dropping the connection if it broke.
    fn settle<T>(
        &self,
        conn: &mut Option<HostConnection>,
        result: Result<T, DataChannelError>,
    ) -> Result<T, EndpointError> {
        result.map_err(|e| {
            if e.breaks_connection() {
                warn!(addr = %self.addr, error = %e, "dropping host connection");
                *conn = None;
            }
            e.into()
        })
    }
}

fn unavailable() -> EndpointError {
    EndpointError::transient("host connection unavailable")
}

impl RemoteEndpoint for HostEndpoint {
    fn name(&self) -> &str {
        &self.name
    }

    fn exists<'a>(&'a self, key: &'a str) -> EndpointFuture<'a, bool> {
        Box::pin(async move {
            let mut guard = self.connection().await?;
            let conn = guard.as_mut().ok_or_else(unavailable)?;
            let result = conn.exists(key).await;
            self.settle(&mut guard, result)
        })
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
            let checksum = checksum_bytes(data);
            let mut guard = self.connection().await?;
            let conn = guard.as_mut().ok_or_else(unavailable)?;
            let result = conn.put_part(key, part, &checksum, data).await;
            self.settle(&mut guard, result)
        })
    }

    fn finalize<'a>(
        &'a self,
        key: &'a str,
        receipts: &'a [PartReceipt],
    ) -> EndpointFuture<'a, FinalizedObject> {
        Box::pin(async move {
            let mut guard = self.connection().await?;
            let conn = guard.as_mut().ok_or_else(unavailable)?;
            let result = conn.finalize(key, receipts).await;
            self.settle(&mut guard, result)
        })
    }

    fn committed_part<'a>(
        &'a self,
        key: &'a str,
        part: &'a Part,
    ) -> EndpointFuture<'a, Option<PartReceipt>> {
        Box::pin(async move {
            let mut guard = self.connection().await?;
            let conn = guard.as_mut().ok_or_else(unavailable)?;
            let result = conn.probe_part(key, part.sequence_index).await;
            let staged = self.settle(&mut guard, result)?;
            Ok(staged.filter(|r| part.matches_receipt(r)))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use chunkferry_data_channel::{HostReceiver, generate_token};
    use chunkferry_protocol::ErrorKind;
    use chunkferry_transfer::StagingArea;

    async fn receiver(dir: &std::path::Path) -> (String, String, CancellationToken) {
        let token = generate_token();
        let cancel = CancellationToken::new();
        let receiver = HostReceiver::new(StagingArea::new(dir), token.clone(), cancel.clone());
        let listener = HostReceiver::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move { receiver.serve(listener).await });
        (addr, token, cancel)
    }

    #[test]
    fn rejects_malformed_token() {
        let err = HostEndpoint::new("127.0.0.1:1", "short", CancellationToken::new())
            .err()
            .unwrap();
        assert_eq!(err.kind, ErrorKind::Auth);
    }

    #[tokio::test]
    async fn round_trip_through_receiver() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, token, cancel) = receiver(dir.path()).await;
        let endpoint = HostEndpoint::new(addr, token, cancel.clone()).unwrap();

        let data = b"host endpoint payload".to_vec();
        let parts: Vec<Part> = chunkferry_transfer::plan(data.len() as u64, 8)
            .unwrap()
            .collect();
        let mut receipts = Vec::new();
        for part in &parts {
            let bytes = &data[part.offset as usize..part.end() as usize];
            receipts.push(endpoint.upload_part("x/y", part, bytes).await.unwrap());
        }
        assert_eq!(
            endpoint.committed_part("x/y", &parts[1]).await.unwrap(),
            Some(receipts[1].clone())
        );
        let object = endpoint.finalize("x/y", &receipts).await.unwrap();
        assert_eq!(object.size, data.len() as u64);
        assert!(endpoint.exists("x/y").await.unwrap());
        endpoint.close().await;

        assert_eq!(std::fs::read(dir.path().join("x/y")).unwrap(), data);
        cancel.cancel();
    }

    #[tokio::test]
    async fn wrong_token_is_auth_error() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, _token, cancel) = receiver(dir.path()).await;
        let endpoint = HostEndpoint::new(addr, generate_token(), cancel.clone()).unwrap();
        let err = endpoint.exists("k").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Auth);
        cancel.cancel();
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let endpoint = HostEndpoint::new(addr, generate_token(), CancellationToken::new()).unwrap();
        let err = endpoint.exists("k").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransientNetwork);
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn abandoned_upload_does_not_poison_the_next_call() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, token, cancel) = receiver(dir.path()).await;
        let endpoint = HostEndpoint::new(addr, token, cancel.clone()).unwrap();
        assert!(!endpoint.exists("k").await.unwrap());

        // Dropped right after the request is written, as a deadline would.
        let part = Part::new(0, 0, 4);
        let dropped =
            tokio::time::timeout(Duration::ZERO, endpoint.upload_part("k", &part, b"abcd")).await;
        assert!(dropped.is_err());
        assert!(endpoint.conn.lock().await.as_ref().unwrap().is_stale());

        assert!(!endpoint.exists("k").await.unwrap());
        let receipt = endpoint.upload_part("k", &part, b"abcd").await.unwrap();
        assert_eq!(receipt.length, 4);
        cancel.cancel();
    }

    #[tokio::test]
    async fn remote_errors_keep_the_connection() {
        let dir = tempfile::tempdir().unwrap();
        let (addr, token, cancel) = receiver(dir.path()).await;
        let endpoint = HostEndpoint::new(addr, token, cancel.clone()).unwrap();

        let err = endpoint.exists("../escape").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidRequest);
        assert!(endpoint.conn.lock().await.is_some());
        assert!(!endpoint.exists("fine").await.unwrap());
        cancel.cancel();
    }
}
