//! Byte-stream framing primitives.
//!
//! Frame format: `[8-byte LE u64 length][payload bytes]`. Requests are preceded
//! by a single command byte. Reads either return the full amount or fail;
//! short reads are never surfaced.

use super::Command;
use crate::{Result, RpcError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one command byte.
///
/// Returns `None` on clean EOF (peer closed the connection between requests).
pub async fn read_command<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<u8>> {
    let mut byte = [0u8; 1];
    match reader.read_exact(&mut byte).await {
        Ok(_) => Ok(Some(byte[0])),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Read the 8-byte length prefix of a frame.
pub async fn read_size<R: AsyncRead + Unpin>(reader: &mut R) -> Result<u64> {
    let mut len_buf = [0u8; 8];
    reader.read_exact(&mut len_buf).await?;
    Ok(u64::from_le_bytes(len_buf))
}

/// Read a length-prefixed frame of at most `max` bytes.
pub async fn read_message<R: AsyncRead + Unpin>(reader: &mut R, max: u64) -> Result<Vec<u8>> {
    let len = read_size(reader).await?;
    if len > max {
        return Err(RpcError::MessageTooLarge { size: len, max });
    }
    read_payload(reader, len).await
}

/// Read a length-prefixed frame whose declared length must be exactly
/// `expected`.
pub async fn read_exact_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    expected: usize,
) -> Result<Vec<u8>> {
    let len = read_size(reader).await?;
    if len != expected as u64 {
        return Err(RpcError::SizeMismatch {
            expected: expected as u64,
            actual: len,
        });
    }
    read_payload(reader, len).await
}

/// Read `len` payload bytes after an already-validated length prefix.
pub async fn read_payload<R: AsyncRead + Unpin>(reader: &mut R, len: u64) -> Result<Vec<u8>> {
    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write a length-prefixed frame.
pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    let len = payload.len() as u64;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Write a command byte followed by a length-prefixed request body.
pub async fn write_request<W: AsyncWrite + Unpin>(
    writer: &mut W,
    command: Command,
    body: &[u8],
) -> Result<()> {
    writer.write_all(&[command.as_u8()]).await?;
    write_message(writer, body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_read_write_roundtrip() {
        let payload = b"hello tensors";
        let mut buf = Vec::new();

        write_message(&mut buf, payload).await.unwrap();
        assert_eq!(&buf[..8], &(payload.len() as u64).to_le_bytes());

        let mut cursor = std::io::Cursor::new(buf);
        let read_back = read_message(&mut cursor, 1024).await.unwrap();
        assert_eq!(read_back, payload.to_vec());
    }

    #[tokio::test]
    async fn test_request_prefixed_by_command_byte() {
        let mut buf = Vec::new();
        write_request(&mut buf, Command::FreeBuffer, &7u64.to_le_bytes())
            .await
            .unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        assert_eq!(read_command(&mut cursor).await.unwrap(), Some(4));
        let body = read_exact_message(&mut cursor, 8).await.unwrap();
        assert_eq!(body, 7u64.to_le_bytes().to_vec());
    }

    #[tokio::test]
    async fn test_read_command_on_empty_stream_returns_none() {
        let mut cursor = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_command(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_reading_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(1u64 << 40).to_le_bytes());
        buf.extend_from_slice(&[0u8; 8]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_message(&mut cursor, 1024).await;
        assert!(matches!(result, Err(RpcError::MessageTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_exact_message_size_mismatch() {
        let mut buf = Vec::new();
        write_message(&mut buf, &[0u8; 3]).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_exact_message(&mut cursor, 8).await;
        assert!(matches!(
            result,
            Err(RpcError::SizeMismatch {
                expected: 8,
                actual: 3
            })
        ));
    }

    #[tokio::test]
    async fn test_truncated_payload_is_connection_closed() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&16u64.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);

        let mut cursor = std::io::Cursor::new(buf);
        let result = read_message(&mut cursor, 1024).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
    }
}
