//! TCP wire format for the host protocol.
//!
//! # Wire format
//!
//! ```text
//! HANDSHAKE (sender -> receiver):     [32 bytes: hex token ASCII]
//! AUTH RESPONSE (receiver -> sender): [1 byte: 0x01=OK, 0x00=rejected]
//!
//! PER FRAME (either direction):
//!   [4 bytes BE: header_len]
//!   [header_len bytes: JSON envelope]
//!   [raw part bytes, put_part requests only; length from the envelope]
//! ```
//!
//! A clean close between frames ends the conversation.

use chunkferry_protocol::Message;
use chunkferry_protocol::constants::{MAX_HEADER_SIZE, MAX_PART_SIZE};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DataChannelError;

/// Authentication response: accepted.
pub const AUTH_OK: u8 = 0x01;

/// Authentication response: rejected.
pub const AUTH_REJECTED: u8 = 0x00;

/// Token length in bytes (32 hex characters).
pub const TOKEN_LEN: usize = 32;

/// Writes one envelope frame. Does not flush.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &Message,
) -> Result<(), DataChannelError> {
    let json = serde_json::to_vec(message)?;
    if json.len() > MAX_HEADER_SIZE {
        return Err(DataChannelError::Protocol(format!(
            "frame header too large: {} bytes (max {MAX_HEADER_SIZE})",
            json.len()
        )));
    }
    writer.write_u32(json.len() as u32).await?;
    writer.write_all(&json).await?;
    Ok(())
}

/// Reads one envelope frame.
///
/// Returns `None` if the peer closed the connection between frames.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Message>, DataChannelError> {
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len == 0 || len > MAX_HEADER_SIZE {
        return Err(DataChannelError::Protocol(format!(
            "invalid frame header length: {len}"
        )));
    }

    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    let message = serde_json::from_slice(&buf)?;
    Ok(Some(message))
}

/// Reads exactly `len` bytes of part data following a `put_part` header.
pub async fn read_part_data<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: u64,
) -> Result<Vec<u8>, DataChannelError> {
    if len > MAX_PART_SIZE {
        return Err(DataChannelError::Protocol(format!(
            "part too large: {len} bytes (max {MAX_PART_SIZE})"
        )));
    }
    let mut data = vec![0u8; len as usize];
    reader.read_exact(&mut data).await?;
    Ok(data)
}

/// Reads and throws away `len` bytes of part data that will not be staged.
pub async fn discard_part_data<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: u64,
) -> Result<(), DataChannelError> {
    let copied = tokio::io::copy(&mut (&mut *reader).take(len), &mut tokio::io::sink()).await?;
    if copied != len {
        return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
    }
    Ok(())
}

/// Writes the authentication token (32 hex ASCII bytes).
pub async fn write_token<W: AsyncWrite + Unpin>(
    writer: &mut W,
    token: &str,
) -> Result<(), DataChannelError> {
    if token.len() != TOKEN_LEN {
        return Err(DataChannelError::Protocol(format!(
            "token must be {TOKEN_LEN} bytes, got {}",
            token.len()
        )));
    }
    writer.write_all(token.as_bytes()).await?;
    Ok(())
}

/// Reads the authentication token (32 hex ASCII bytes).
pub async fn read_token<R: AsyncRead + Unpin>(reader: &mut R) -> Result<String, DataChannelError> {
    let mut buf = [0u8; TOKEN_LEN];
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf.to_vec())
        .map_err(|e| DataChannelError::Protocol(format!("invalid token encoding: {e}")))
}

/// Writes the authentication response byte.
pub async fn write_auth_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    accepted: bool,
) -> Result<(), DataChannelError> {
    writer
        .write_u8(if accepted { AUTH_OK } else { AUTH_REJECTED })
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the authentication response byte.
pub async fn read_auth_response<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<bool, DataChannelError> {
    let byte = reader.read_u8().await?;
    Ok(byte == AUTH_OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chunkferry_protocol::MessageType;
    use chunkferry_protocol::messages::PutPartRequest;

    #[tokio::test]
    async fn frame_with_part_data() {
        let req = PutPartRequest {
            key: "obj/a.bin".into(),
            sequence_index: 2,
            offset: 8,
            length: 5,
            checksum: "ab".into(),
        };
        let msg = Message::new("1", MessageType::PutPart, Some(&req)).unwrap();

        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();
        buf.extend_from_slice(b"hello");

        let mut cursor = &buf[..];
        let parsed = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(parsed.msg_type, MessageType::PutPart);
        let parsed_req: PutPartRequest = parsed.parse_payload().unwrap().unwrap();
        assert_eq!(parsed_req, req);

        let data = read_part_data(&mut cursor, parsed_req.length).await.unwrap();
        assert_eq!(data, b"hello");
        assert!(read_message(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn discarded_part_data_keeps_frames_aligned() {
        let bye = Message::new::<()>("2", MessageType::Bye, None).unwrap();
        let mut buf = b"unwanted".to_vec();
        write_message(&mut buf, &bye).await.unwrap();

        let mut cursor = &buf[..];
        discard_part_data(&mut cursor, 8).await.unwrap();
        let next = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(next.msg_type, MessageType::Bye);

        let mut short: &[u8] = b"abc";
        assert!(matches!(
            discard_part_data(&mut short, 8).await,
            Err(DataChannelError::Io(_))
        ));
    }

    #[tokio::test]
    async fn clean_close_between_frames() {
        let mut cursor: &[u8] = &[];
        assert!(read_message(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let msg = Message::new::<()>("1", MessageType::Bye, None).unwrap();
        let mut buf = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();
        buf.truncate(buf.len() - 2);

        let mut cursor = &buf[..];
        assert!(matches!(
            read_message(&mut cursor).await,
            Err(DataChannelError::Io(_))
        ));
    }

    #[tokio::test]
    async fn oversized_header_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MAX_HEADER_SIZE as u32) + 1).to_be_bytes());
        let mut cursor = &buf[..];
        assert!(matches!(
            read_message(&mut cursor).await,
            Err(DataChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn oversized_part_rejected() {
        let mut cursor: &[u8] = &[];
        assert!(matches!(
            read_part_data(&mut cursor, MAX_PART_SIZE + 1).await,
            Err(DataChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn token_roundtrip() {
        let token = "a1b2c3d4e5f6a7b8a1b2c3d4e5f6a7b8";

        let mut buf = Vec::new();
        write_token(&mut buf, token).await.unwrap();

        let mut cursor = &buf[..];
        let parsed = read_token(&mut cursor).await.unwrap();
        assert_eq!(parsed, token);
    }

    #[tokio::test]
    async fn auth_response_accepted() {
        let mut buf = Vec::new();
        write_auth_response(&mut buf, true).await.unwrap();
        assert_eq!(buf[0], AUTH_OK);

        let mut cursor = &buf[..];
        assert!(read_auth_response(&mut cursor).await.unwrap());
    }

    #[tokio::test]
    async fn auth_response_rejected() {
        let mut buf = Vec::new();
        write_auth_response(&mut buf, false).await.unwrap();
        assert_eq!(buf[0], AUTH_REJECTED);

        let mut cursor = &buf[..];
        assert!(!read_auth_response(&mut cursor).await.unwrap());
    }

    #[tokio::test]
    async fn invalid_token_length() {
        let mut buf = Vec::new();
        let result = write_token(&mut buf, "too_short").await;
        assert!(result.is_err());
    }
}
