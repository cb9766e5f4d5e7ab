//! TCP data server (receiver side).
//!
//! Accepts any number of authenticated connections until cancelled and
//! stages the parts they send in a [`StagingArea`].

use std::net::SocketAddr;
use std::sync::Arc;

use chunkferry_protocol::messages::{
    ExistsRequest, ExistsResponse, FinalizeRequest, FinalizeResponse, PartReceiptResponse,
    ProbePartRequest, ProbePartResponse, PutPartRequest,
};
use chunkferry_protocol::constants::MAX_PART_SIZE;
use chunkferry_protocol::{ErrorKind, Message, MessageType, Part};
use chunkferry_transfer::{StagingArea, TransferError};
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::DataChannelError;
use crate::wire::{
    discard_part_data, read_message, read_part_data, read_token, write_auth_response,
    write_message,
};
use crate::{TCP_AUTH_TIMEOUT, TCP_BUFFER_SIZE, TCP_IDLE_TIMEOUT};

/// Receives parts from senders and assembles them under a root directory.
#[derive(Clone)]
pub struct HostReceiver {
    staging: Arc<StagingArea>,
    token: Arc<str>,
    cancel: CancellationToken,
}

impl HostReceiver {
    pub fn new(staging: StagingArea, token: impl Into<Arc<str>>, cancel: CancellationToken) -> Self {
        Self {
            staging: Arc::new(staging),
            token: token.into(),
            cancel,
        }
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    /// Binds a listener. Use port 0 for an ephemeral port.
    pub async fn bind(addr: SocketAddr) -> Result<TcpListener, DataChannelError> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "host receiver listening");
        Ok(listener)
    }

    /// Accepts connections until the cancellation token fires.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DataChannelError> {
        loop {
            let (stream, addr) = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!("host receiver stopped");
                    return Ok(());
                }
                result = listener.accept() => result?,
            };

            debug!(%addr, "connection accepted");
            let receiver = self.clone();
            tokio::spawn(async move {
                if let Err(e) = receiver.handle_connection(stream).await {
                    warn!(%addr, error = %e, "connection ended with error");
                }
            });
        }
    }

    /// Serves one connection: handshake, then requests until `bye` or close.
    pub async fn handle_connection(&self, stream: TcpStream) -> Result<(), DataChannelError> {
        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);
        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);

        // Authenticate with timeout.
        let received_token = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(DataChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_AUTH_TIMEOUT, read_token(&mut reader)) => {
                match result {
                    Ok(Ok(t)) => t,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(DataChannelError::Timeout),
                }
            }
        };

        if !crate::token::validate_token(&received_token, &self.token) {
            warn!("host receiver: invalid token");
            write_auth_response(&mut writer, false).await?;
            return Err(DataChannelError::AuthFailed("invalid token".into()));
        }
        write_auth_response(&mut writer, true).await?;

        loop {
            let request = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(DataChannelError::Cancelled);
                }
                result = tokio::time::timeout(TCP_IDLE_TIMEOUT, read_message(&mut reader)) => {
                    match result {
                        Ok(Ok(Some(msg))) => msg,
                        Ok(Ok(None)) => {
                            debug!("sender closed connection");
                            return Ok(());
                        }
                        Ok(Err(e)) => return Err(e),
                        Err(_) => return Err(DataChannelError::Timeout),
                    }
                }
            };

            let reply = match &request.msg_type {
                MessageType::Bye => {
                    debug!("sender said bye");
                    return Ok(());
                }
                MessageType::Exists => self.on_exists(&request).await,
                MessageType::PutPart => {
                    let req: PutPartRequest = parse(&request)?;
                    // The data follows the header whether or not the request
                    // is acceptable; consume it to keep the stream in sync.
                    if req.length > MAX_PART_SIZE {
                        discard_part_data(&mut reader, req.length).await?;
                        Ok(request.reply_error(
                            ErrorKind::InvalidRequest,
                            format!("part too large: {} bytes (max {MAX_PART_SIZE})", req.length),
                        ))
                    } else {
                        let data = read_part_data(&mut reader, req.length).await?;
                        self.on_put_part(&request, req, data).await
                    }
                }
                MessageType::ProbePart => self.on_probe_part(&request).await,
                MessageType::Finalize => self.on_finalize(&request).await,
                other => Ok(request.reply_error(
                    ErrorKind::InvalidRequest,
                    format!("unexpected message type {other:?}"),
                )),
            };

            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    let kind = e.kind();
                    debug!(id = %request.id, kind = %kind, error = %e, "request failed");
                    request.reply_error(kind, e.to_string())
                }
            };
            write_message(&mut writer, &reply).await?;
            writer.flush().await?;
        }
    }

    async fn on_exists(&self, request: &Message) -> Result<Message, TransferError> {
        let req: ExistsRequest = parse_payload(request)?;
        let staging = Arc::clone(&self.staging);
        let exists = blocking(move || staging.exists(&req.key)).await?;
        Ok(request.reply(MessageType::ExistsResult, Some(&ExistsResponse { exists }))?)
    }

    async fn on_put_part(
        &self,
        request: &Message,
        req: PutPartRequest,
        data: Vec<u8>,
    ) -> Result<Message, TransferError> {
        let part = Part::new(req.sequence_index, req.offset, req.length);
        let staging = Arc::clone(&self.staging);
        let receipt =
            blocking(move || staging.stage_part(&req.key, &part, &data, &req.checksum)).await?;
        Ok(request.reply(
            MessageType::PartReceipt,
            Some(&PartReceiptResponse { receipt }),
        )?)
    }

    async fn on_probe_part(&self, request: &Message) -> Result<Message, TransferError> {
        let req: ProbePartRequest = parse_payload(request)?;
        let staging = Arc::clone(&self.staging);
        let receipt = blocking(move || staging.staged_part(&req.key, req.sequence_index)).await?;
        Ok(request.reply(MessageType::ProbeResult, Some(&ProbePartResponse { receipt }))?)
    }

    async fn on_finalize(&self, request: &Message) -> Result<Message, TransferError> {
        let req: FinalizeRequest = parse_payload(request)?;
        let staging = Arc::clone(&self.staging);
        let object = blocking(move || staging.assemble(&req.key, &req.receipts)).await?;
        info!(key = %object.key, size = object.size, parts = object.part_count, "object assembled");
        Ok(request.reply(MessageType::Finalized, Some(&FinalizeResponse { object }))?)
    }
}

fn parse<T: DeserializeOwned>(request: &Message) -> Result<T, DataChannelError> {
    request
        .parse_payload()?
        .ok_or_else(|| DataChannelError::Protocol(format!("{:?} without payload", request.msg_type)))
}

fn parse_payload<T: DeserializeOwned>(request: &Message) -> Result<T, TransferError> {
    request.parse_payload()?.ok_or_else(|| {
        TransferError::Json(serde::de::Error::custom(format!(
            "{:?} without payload",
            request.msg_type
        )))
    })
}

async fn blocking<T, F>(f: F) -> Result<T, TransferError>
where
    F: FnOnce() -> Result<T, TransferError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| TransferError::Io(std::io::Error::other(e)))?
}
