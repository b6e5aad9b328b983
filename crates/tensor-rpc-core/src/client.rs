//! TCP client for a remote tensor backend.
//!
//! Calls are queued and a single worker task owns the socket, so exactly one
//! request is in flight per connection and responses pair up with requests by
//! order alone. Any transport failure or size mismatch ends the connection:
//! the call that hit it and every queued call fail, and later calls fail fast.
//!
//! Failures reported by the server (an unknown handle, an out-of-range write)
//! are values, not errors: `Err` always means the connection is gone.
//!
//! # Thread Safety
//!
//! All methods take `&self`; concurrent callers are serialized by the queue.

use crate::backend::{DeviceMemory, GraphStatus};
use crate::config::RpcConfig;
use crate::protocol::frame::{read_payload, read_size, write_request};
use crate::protocol::{
    AllocBufferReq, BufferClearReq, BufferGetBaseReq, Command, CopyTensorReq, FreeBufferReq,
    GetAllocSizeReq, GetTensorReq, GraphComputeReq, InitTensorReq, Request, Response,
    ResponseFrame, SetTensorReq, WireTensor,
};
use crate::queue::TaskQueue;
use crate::{Result, RpcError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// A buffer allocated on the server. A zero handle means the allocation failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteBuffer {
    pub handle: u64,
    pub size: u64,
}

impl RemoteBuffer {
    pub fn is_null(&self) -> bool {
        self.handle == 0
    }
}

struct ClientTask {
    command: Command,
    input: Vec<u8>,
    /// Exact response length the server must declare.
    output_size: usize,
    reply: oneshot::Sender<Result<Vec<u8>>>,
}

/// Connection to a tensor RPC server.
pub struct RpcClient {
    addr: SocketAddr,
    queue: Arc<TaskQueue<ClientTask>>,
    running: Arc<AtomicBool>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

fn unexpected(command: Command, response: &Response) -> RpcError {
    RpcError::malformed(format!(
        "{} answered with a {} response",
        command,
        response.command()
    ))
}

impl RpcClient {
    /// Connect to a server, giving up after [`RpcConfig::CONNECT_TIMEOUT`].
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(RpcConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| RpcError::Io {
                message: format!(
                    "Connecting to {} timed out after {:?}",
                    addr,
                    RpcConfig::CONNECT_TIMEOUT
                ),
                source: None,
            })??;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
        }

        debug!("Tensor RPC client connected to {}", addr);

        let queue = Arc::new(TaskQueue::new());
        let running = Arc::new(AtomicBool::new(true));
        let worker = tokio::spawn(Self::dispatch_loop(
            addr,
            stream,
            queue.clone(),
            running.clone(),
        ));

        Ok(Self {
            addr,
            queue,
            running,
            worker: Some(worker),
        })
    }

    /// Get the address of the server.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether the connection is still usable.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the connection. Queued calls fail; an in-flight call completes.
    pub async fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.shutdown();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }

    async fn dispatch_loop(
        addr: SocketAddr,
        mut stream: TcpStream,
        queue: Arc<TaskQueue<ClientTask>>,
        running: Arc<AtomicBool>,
    ) {
        while let Some(task) = queue.pop().await {
            match Self::roundtrip(&mut stream, &task).await {
                Ok(body) => {
                    let _ = task.reply.send(Ok(body));
                }
                // The stream is still aligned on a frame boundary
                Err(e) if !e.is_fatal() => {
                    let _ = task.reply.send(Err(e));
                }
                Err(e) => {
                    warn!("Connection to {} failed during {}: {}", addr, task.command, e);
                    running.store(false, Ordering::SeqCst);
                    let discarded = queue.shutdown();
                    if discarded > 0 {
                        debug!("Failed {} queued calls to {}", discarded, addr);
                    }
                    let _ = task.reply.send(Err(e));
                    break;
                }
            }
        }
        running.store(false, Ordering::SeqCst);
        debug!("Tensor RPC client for {} stopped", addr);
    }

    async fn roundtrip(stream: &mut TcpStream, task: &ClientTask) -> Result<Vec<u8>> {
        write_request(stream, task.command, &task.input).await?;
        let size = read_size(stream).await?;
        if size != task.output_size as u64 {
            return Err(RpcError::SizeMismatch {
                expected: task.output_size as u64,
                actual: size,
            });
        }
        read_payload(stream, size).await
    }

    /// Queue a request and wait for its response frame.
    pub async fn call(&self, request: Request) -> Result<ResponseFrame> {
        if !self.is_running() {
            return Err(RpcError::ConnectionClosed);
        }
        let command = request.command();
        let (reply, response) = oneshot::channel();
        let task = ClientTask {
            command,
            output_size: 1 + request.response_len(),
            input: request.encode(),
            reply,
        };
        if self.queue.push(task).is_err() {
            return Err(RpcError::ConnectionClosed);
        }

        let body = response.await.map_err(|_| RpcError::ConnectionClosed)??;
        ResponseFrame::decode(command, &body)
    }

    /// Allocate a buffer. A failed allocation returns a null buffer.
    pub async fn alloc_buffer(&self, size: u64) -> Result<RemoteBuffer> {
        let frame = self
            .call(Request::AllocBuffer(AllocBufferReq { size }))
            .await?;
        let Response::AllocBuffer(rsp) = &frame.response else {
            return Err(unexpected(Command::AllocBuffer, &frame.response));
        };
        if !frame.ok {
            return Ok(RemoteBuffer::default());
        }
        Ok(RemoteBuffer {
            handle: rsp.remote_ptr,
            size: rsp.remote_size,
        })
    }

    pub async fn get_alignment(&self) -> Result<u64> {
        let frame = self.call(Request::GetAlignment).await?;
        match frame.response {
            Response::GetAlignment(rsp) => Ok(rsp.alignment),
            other => Err(unexpected(Command::GetAlignment, &other)),
        }
    }

    pub async fn get_max_size(&self) -> Result<u64> {
        let frame = self.call(Request::GetMaxSize).await?;
        match frame.response {
            Response::GetMaxSize(rsp) => Ok(rsp.max_size),
            other => Err(unexpected(Command::GetMaxSize, &other)),
        }
    }

    /// Base address of a buffer, or `None` if the server does not know it.
    pub async fn buffer_get_base(&self, handle: u64) -> Result<Option<u64>> {
        let frame = self
            .call(Request::BufferGetBase(BufferGetBaseReq { remote_ptr: handle }))
            .await?;
        match frame.response {
            Response::BufferGetBase(rsp) => Ok(frame.ok.then_some(rsp.base_ptr)),
            other => Err(unexpected(Command::BufferGetBase, &other)),
        }
    }

    pub async fn free_buffer(&self, handle: u64) -> Result<bool> {
        let frame = self
            .call(Request::FreeBuffer(FreeBufferReq { remote_ptr: handle }))
            .await?;
        Ok(frame.ok)
    }

    pub async fn buffer_clear(&self, handle: u64, value: u8) -> Result<bool> {
        let frame = self
            .call(Request::BufferClear(BufferClearReq {
                remote_ptr: handle,
                value,
            }))
            .await?;
        Ok(frame.ok)
    }

    /// Write `data` at `offset` bytes into `tensor`.
    pub async fn set_tensor(&self, tensor: &WireTensor, offset: u64, data: &[u8]) -> Result<bool> {
        let payload = SetTensorReq {
            tensor: tensor.clone(),
            offset,
            data: data.to_vec(),
        }
        .encode();
        let frame = self.call(Request::SetTensor(payload)).await?;
        Ok(frame.ok)
    }

    /// Read `size` bytes at `offset` bytes into `tensor`.
    pub async fn get_tensor(
        &self,
        tensor: &WireTensor,
        offset: u64,
        size: u64,
    ) -> Result<Option<Vec<u8>>> {
        let frame = self
            .call(Request::GetTensor(GetTensorReq {
                tensor: tensor.clone(),
                offset,
                size,
            }))
            .await?;
        match frame.response {
            Response::GetTensor(data) => Ok(frame.ok.then_some(data)),
            other => Err(unexpected(Command::GetTensor, &other)),
        }
    }

    /// Copy `src` into `dst` on the server. `false` if the server refused.
    pub async fn copy_tensor(&self, src: &WireTensor, dst: &WireTensor) -> Result<bool> {
        let frame = self
            .call(Request::CopyTensor(CopyTensorReq {
                src: src.clone(),
                dst: dst.clone(),
            }))
            .await?;
        match frame.response {
            Response::CopyTensor(rsp) => Ok(frame.ok && rsp.result != 0),
            other => Err(unexpected(Command::CopyTensor, &other)),
        }
    }

    pub async fn graph_compute(&self, graph: &GraphComputeReq) -> Result<GraphStatus> {
        let frame = self
            .call(Request::GraphCompute(graph.encode()))
            .await?;
        match frame.response {
            Response::GraphCompute(_) if !frame.ok => Ok(GraphStatus::Failed),
            Response::GraphCompute(rsp) => Ok(GraphStatus::from_code(rsp.result)),
            other => Err(unexpected(Command::GraphCompute, &other)),
        }
    }

    pub async fn get_device_memory(&self) -> Result<DeviceMemory> {
        let frame = self.call(Request::GetDeviceMemory).await?;
        match frame.response {
            Response::GetDeviceMemory(rsp) => Ok(DeviceMemory {
                free: rsp.free_mem,
                total: rsp.total_mem,
            }),
            other => Err(unexpected(Command::GetDeviceMemory, &other)),
        }
    }

    pub async fn init_tensor(&self, tensor: &WireTensor) -> Result<bool> {
        let frame = self
            .call(Request::InitTensor(InitTensorReq {
                tensor: tensor.clone(),
            }))
            .await?;
        Ok(frame.ok)
    }

    /// Bytes the server needs to hold `tensor`, or `None` if it rejected it.
    pub async fn get_alloc_size(&self, tensor: &WireTensor) -> Result<Option<u64>> {
        let frame = self
            .call(Request::GetAllocSize(GetAllocSizeReq {
                tensor: tensor.clone(),
            }))
            .await?;
        match frame.response {
            Response::GetAllocSize(rsp) => Ok(frame.ok.then_some(rsp.alloc_size)),
            other => Err(unexpected(Command::GetAllocSize, &other)),
        }
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.queue.shutdown();
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("addr", &self.addr)
            .field("running", &self.is_running())
            .field("queued", &self.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HostBackend;
    use crate::config::ServerConfig;
    use crate::protocol::frame::{read_command, read_message, write_message};
    use crate::server::{RpcServer, RpcServerHandle};
    use crate::tensor::ElementType;
    use tokio::net::TcpListener;

    async fn start_server() -> RpcServerHandle {
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        RpcServer::start(config, Arc::new(HostBackend::new(1 << 20)))
            .await
            .unwrap()
    }

    /// A server that answers the first request with a length that no
    /// command ever expects.
    async fn start_lying_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            read_command(&mut stream).await.unwrap();
            read_message(&mut stream, 1 << 20).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            write_message(&mut stream, &[1, 2, 3]).await.unwrap();
            // Keep the socket open so only the size check can fail the call
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
        });
        addr
    }

    #[tokio::test]
    async fn test_client_queries() {
        let mut handle = start_server().await;
        let client = RpcClient::connect(handle.addr()).await.unwrap();

        assert_eq!(client.addr(), handle.addr());
        assert_eq!(client.get_alignment().await.unwrap(), RpcConfig::HOST_ALIGNMENT);
        assert_eq!(client.get_max_size().await.unwrap(), 1 << 20);
        let memory = client.get_device_memory().await.unwrap();
        assert_eq!(memory.total, 1 << 20);
        assert_eq!(memory.free, 1 << 20);

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_buffer_lifecycle() {
        let mut handle = start_server().await;
        let client = RpcClient::connect(handle.addr()).await.unwrap();

        let buffer = client.alloc_buffer(1024).await.unwrap();
        assert!(!buffer.is_null());
        assert_eq!(buffer.size, 1024);

        let base = client.buffer_get_base(buffer.handle).await.unwrap().unwrap();
        let tensor = WireTensor::new(1, ElementType::I8, [64, 1, 1, 1]).with_storage(buffer.handle, base);
        assert!(client.buffer_clear(buffer.handle, 7).await.unwrap());
        assert_eq!(
            client.get_tensor(&tensor, 0, 64).await.unwrap(),
            Some(vec![7; 64])
        );

        assert!(client.free_buffer(buffer.handle).await.unwrap());
        assert_eq!(client.buffer_get_base(buffer.handle).await.unwrap(), None);
        assert!(!client.free_buffer(buffer.handle).await.unwrap());
        assert!(client.is_running());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_client_oversized_allocation_is_null() {
        let mut handle = start_server().await;
        let client = RpcClient::connect(handle.addr()).await.unwrap();

        let buffer = client.alloc_buffer(1 << 30).await.unwrap();
        assert!(buffer.is_null());
        assert_eq!(buffer.size, 0);
        assert!(client.is_running());

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_size_mismatch_stops_connection() {
        let addr = start_lying_server().await;
        let client = RpcClient::connect(addr).await.unwrap();

        let (first, second) = tokio::join!(client.get_alignment(), client.get_max_size());
        assert!(matches!(
            first,
            Err(RpcError::SizeMismatch {
                expected: 9,
                actual: 3
            })
        ));
        assert!(matches!(second, Err(RpcError::ConnectionClosed)));
        assert!(!client.is_running());

        assert!(matches!(
            client.get_device_memory().await,
            Err(RpcError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_fails_later_calls() {
        let mut handle = start_server().await;
        let mut client = RpcClient::connect(handle.addr()).await.unwrap();
        client.close().await;

        assert!(!client.is_running());
        assert!(matches!(
            client.get_alignment().await,
            Err(RpcError::ConnectionClosed)
        ));

        handle.shutdown();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = RpcClient::connect(addr).await;
        assert!(matches!(result, Err(RpcError::Io { .. })));
    }
}
