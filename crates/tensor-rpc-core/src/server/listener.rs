//! Request intake for one connection.

use super::{ConnectionId, ServerTask};
use crate::protocol::frame::{read_command, read_exact_message, read_message};
use crate::protocol::{Command, Request};
use crate::queue::TaskQueue;
use crate::{Result, RpcError};
use tokio::io::AsyncRead;
use tracing::debug;

/// Read requests from `reader` and queue them until the peer disconnects.
///
/// Never touches the backend. Returns `Ok(())` on a clean disconnect between
/// requests or when the queue has been shut down, and an error for anything
/// that leaves the stream unusable: an unknown opcode, a body of the wrong
/// size, an oversized body, or a truncated frame. Nothing is queued for the
/// request that failed.
pub async fn listen<R>(
    id: ConnectionId,
    reader: &mut R,
    queue: &TaskQueue<ServerTask>,
    max_message_size: u64,
) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    loop {
        let Some(byte) = read_command(reader).await? else {
            return Ok(());
        };
        let command = Command::try_from(byte)?;

        let body = match command.request_size() {
            Some(size) => read_exact_message(reader, size).await?,
            None => read_message(reader, max_message_size).await?,
        };
        let request = Request::decode(command, body)?;

        // The response to a read carries `size` bytes even when it fails.
        if let Request::GetTensor(req) = &request {
            if req.size > max_message_size {
                return Err(RpcError::MessageTooLarge {
                    size: req.size,
                    max: max_message_size,
                });
            }
        }

        debug!("Connection {}: queued {}", id, command);
        if queue.push(ServerTask { connection: id, request }).is_err() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::write_request;
    use crate::protocol::{AllocBufferReq, FreeBufferReq, GetTensorReq, SetTensorReq, WireTensor};
    use tokio::io::AsyncWriteExt;

    const MAX: u64 = 4096;

    async fn encoded(requests: &[Request]) -> Vec<u8> {
        let mut bytes = Vec::new();
        for request in requests {
            write_request(&mut bytes, request.command(), &request.encode())
                .await
                .unwrap();
        }
        bytes
    }

    #[tokio::test]
    async fn test_requests_queued_in_order() {
        let requests = vec![
            Request::AllocBuffer(AllocBufferReq { size: 64 }),
            Request::SetTensor(
                SetTensorReq {
                    tensor: WireTensor::default(),
                    offset: 0,
                    data: vec![7; 32],
                }
                .encode(),
            ),
            Request::GetAlignment,
            Request::FreeBuffer(FreeBufferReq { remote_ptr: 1 }),
        ];
        let bytes = encoded(&requests).await;

        let queue = TaskQueue::new();
        listen(1, &mut bytes.as_slice(), &queue, MAX).await.unwrap();

        let mut queued = Vec::new();
        while !queue.is_empty() {
            queued.push(queue.pop().await.unwrap().request);
        }
        assert_eq!(queued, requests);
    }

    #[tokio::test]
    async fn test_invalid_opcode_closes_without_queueing() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&[255]).await.unwrap();
        client.write_all(&0u64.to_le_bytes()).await.unwrap();

        let queue = TaskQueue::new();
        let result = listen(1, &mut server, &queue, MAX).await;
        assert!(matches!(result, Err(RpcError::InvalidCommand(255))));
        assert!(queue.is_empty());

        // Opcode equal to the command count is the first invalid one
        let mut bytes: &[u8] = &[Command::COUNT];
        let result = listen(1, &mut bytes, &queue, MAX).await;
        assert!(matches!(result, Err(RpcError::InvalidCommand(_))));
    }

    #[tokio::test]
    async fn test_fixed_body_with_wrong_length_rejected() {
        let mut bytes = vec![Command::FreeBuffer.as_u8()];
        bytes.extend_from_slice(&4u64.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);

        let queue = TaskQueue::new();
        let result = listen(1, &mut bytes.as_slice(), &queue, MAX).await;
        assert!(matches!(
            result,
            Err(RpcError::SizeMismatch {
                expected: 8,
                actual: 4
            })
        ));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_variable_body_rejected() {
        let mut bytes = vec![Command::SetTensor.as_u8()];
        bytes.extend_from_slice(&(MAX + 1).to_le_bytes());

        let queue = TaskQueue::new();
        let result = listen(1, &mut bytes.as_slice(), &queue, MAX).await;
        assert!(matches!(result, Err(RpcError::MessageTooLarge { .. })));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_oversized_read_rejected() {
        let bytes = encoded(&[Request::GetTensor(GetTensorReq {
            tensor: WireTensor::default(),
            offset: 0,
            size: MAX + 1,
        })])
        .await;

        let queue = TaskQueue::new();
        let result = listen(1, &mut bytes.as_slice(), &queue, MAX).await;
        assert!(matches!(result, Err(RpcError::MessageTooLarge { .. })));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_truncated_body_is_connection_closed() {
        let mut bytes = encoded(&[Request::AllocBuffer(AllocBufferReq { size: 1 })]).await;
        bytes.truncate(bytes.len() - 3);

        let queue = TaskQueue::new();
        let result = listen(1, &mut bytes.as_slice(), &queue, MAX).await;
        assert!(matches!(result, Err(RpcError::ConnectionClosed)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_stops_when_queue_shut_down() {
        let bytes = encoded(&[Request::GetAlignment, Request::GetMaxSize]).await;
        let queue = TaskQueue::new();
        queue.shutdown();
        listen(1, &mut bytes.as_slice(), &queue, MAX).await.unwrap();
        assert!(queue.is_empty());
    }
}
