//! TCP data client (sender side).
//!
//! Connects to a [`HostReceiver`](crate::HostReceiver), authenticates with
//! the shared token, and issues requests one at a time.

use std::net::SocketAddr;
use std::time::Duration;

use chunkferry_protocol::constants::{MAX_PART_SIZE, PART_REQUEST_TIMEOUT, REQUEST_TIMEOUT};
use chunkferry_protocol::messages::{
    ExistsRequest, ExistsResponse, FinalizeRequest, FinalizeResponse, PartReceiptResponse,
    ProbePartRequest, ProbePartResponse, PutPartRequest,
};
use chunkferry_protocol::{FinalizedObject, Message, MessageType, Part, PartReceipt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::DataChannelError;
use crate::wire::{read_auth_response, read_message, write_message, write_token};
use crate::{TCP_AUTH_TIMEOUT, TCP_BUFFER_SIZE, TCP_CONNECT_TIMEOUT};

/// An authenticated connection to a host receiver.
pub struct HostConnection {
    addr: SocketAddr,
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
    next_id: u64,
    /// Set while a request is written but its reply not yet read.
    in_flight: bool,
    cancel: CancellationToken,
}

impl HostConnection {
    /// Connects to the receiver and authenticates.
    pub async fn connect(
        addr: SocketAddr,
        token: &str,
        cancel: CancellationToken,
    ) -> Result<Self, DataChannelError> {
        // Connect with timeout + cancellation.
        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DataChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(addr)) => {
                match result {
                    Ok(Ok(s)) => s,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => return Err(DataChannelError::Timeout),
                }
            }
        };
        stream.set_nodelay(true)?;

        let (reader, writer) = stream.into_split();
        let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);
        let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);

        write_token(&mut writer, token).await?;
        writer.flush().await?;

        // Wait for auth response with timeout.
        let accepted = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(DataChannelError::Cancelled);
            }
            result = tokio::time::timeout(TCP_AUTH_TIMEOUT, read_auth_response(&mut reader)) => {
                match result {
                    Ok(Ok(a)) => a,
                    Ok(Err(e)) => return Err(e),
                    Err(_) => return Err(DataChannelError::Timeout),
                }
            }
        };

        if !accepted {
            return Err(DataChannelError::AuthFailed("receiver rejected token".into()));
        }

        info!(%addr, "host connection authenticated");
        Ok(Self {
            addr,
            reader,
            writer,
            next_id: 0,
            in_flight: false,
            cancel,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns `true` if a request was abandoned before its reply arrived.
    /// The stream position is unknown, so the connection must be replaced.
    pub fn is_stale(&self) -> bool {
        self.in_flight
    }

    /// Asks whether an assembled object exists at `key`.
    pub async fn exists(&mut self, key: &str) -> Result<bool, DataChannelError> {
        let req = ExistsRequest { key: key.into() };
        let resp: ExistsResponse = self
            .request(MessageType::Exists, &req, None, REQUEST_TIMEOUT)
            .await?;
        Ok(resp.exists)
    }

    /// Sends one part. `data` must be exactly `part.length` bytes.
    pub async fn put_part(
        &mut self,
        key: &str,
        part: &Part,
        checksum: &str,
        data: &[u8],
    ) -> Result<PartReceipt, DataChannelError> {
        if part.length > MAX_PART_SIZE {
            return Err(DataChannelError::Protocol(format!(
                "part {} is {} bytes, the receiver accepts at most {MAX_PART_SIZE}",
                part.sequence_index, part.length
            )));
        }
        if data.len() as u64 != part.length {
            return Err(DataChannelError::Protocol(format!(
                "part {} is {} bytes, payload has {}",
                part.sequence_index,
                part.length,
                data.len()
            )));
        }
        let req = PutPartRequest {
            key: key.into(),
            sequence_index: part.sequence_index,
            offset: part.offset,
            length: part.length,
            checksum: checksum.into(),
        };
        let resp: PartReceiptResponse = self
            .request(MessageType::PutPart, &req, Some(data), PART_REQUEST_TIMEOUT)
            .await?;
        debug!(key, index = part.sequence_index, "part acknowledged");
        Ok(resp.receipt)
    }

    /// Returns the receiver's receipt for a staged part, if any.
    pub async fn probe_part(
        &mut self,
        key: &str,
        sequence_index: u32,
    ) -> Result<Option<PartReceipt>, DataChannelError> {
        let req = ProbePartRequest {
            key: key.into(),
            sequence_index,
        };
        let resp: ProbePartResponse = self
            .request(MessageType::ProbePart, &req, None, REQUEST_TIMEOUT)
            .await?;
        Ok(resp.receipt)
    }

    /// Assembles the staged parts into the object at `key`.
    pub async fn finalize(
        &mut self,
        key: &str,
        receipts: &[PartReceipt],
    ) -> Result<FinalizedObject, DataChannelError> {
        let req = FinalizeRequest {
            key: key.into(),
            receipts: receipts.to_vec(),
        };
        let resp: FinalizeResponse = self
            .request(MessageType::Finalize, &req, None, PART_REQUEST_TIMEOUT)
            .await?;
        Ok(resp.object)
    }

    /// Says goodbye and closes the connection.
    pub async fn close(mut self) -> Result<(), DataChannelError> {
        let id = self.next_id();
        let msg = Message::new::<()>(id, MessageType::Bye, None)?;
        write_message(&mut self.writer, &msg).await?;
        self.writer.flush().await?;
        self.writer.shutdown().await?;
        debug!(addr = %self.addr, "host connection closed");
        Ok(())
    }

    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }

    async fn request<Req, Resp>(
        &mut self,
        msg_type: MessageType,
        payload: &Req,
        data: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<Resp, DataChannelError>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        if self.in_flight {
            return Err(DataChannelError::OutOfSync(
                "previous request was abandoned mid-exchange".into(),
            ));
        }
        let id = self.next_id();
        let expected = msg_type.response_type();
        let msg = Message::new(&id, msg_type, Some(payload))?;
        let cancel = self.cancel.clone();

        self.in_flight = true;
        let exchange = async {
            write_message(&mut self.writer, &msg).await?;
            if let Some(data) = data {
                self.writer.write_all(data).await?;
            }
            self.writer.flush().await?;
            read_message(&mut self.reader).await
        };

        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DataChannelError::Cancelled),
            result = tokio::time::timeout(timeout, exchange) => match result {
                Ok(Ok(Some(reply))) => reply,
                Ok(Ok(None)) => {
                    return Err(DataChannelError::Io(std::io::Error::from(
                        std::io::ErrorKind::UnexpectedEof,
                    )));
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(DataChannelError::Timeout),
            },
        };
        self.in_flight = false;

        if reply.id != id {
            return Err(DataChannelError::OutOfSync(format!(
                "reply id {} does not match request {id}",
                reply.id
            )));
        }
        if reply.msg_type == MessageType::Error {
            let error = reply.error.ok_or_else(|| {
                DataChannelError::Protocol("error reply without details".into())
            })?;
            return Err(DataChannelError::Remote(error));
        }
        if Some(&reply.msg_type) != expected.as_ref() {
            return Err(DataChannelError::Protocol(format!(
                "unexpected reply type {:?}",
                reply.msg_type
            )));
        }
        reply
            .parse_payload()?
            .ok_or_else(|| DataChannelError::Protocol("reply without payload".into()))
    }
}
