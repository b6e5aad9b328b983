//! Tensor RPC - Remote tensor backend over TCP.
//!
//! A client allocates buffers on a remote compute device, moves tensor data in
//! and out, and ships whole compute graphs for execution. The server keeps a
//! registry of remote objects per connection and validates every handle and
//! range before it reaches the device.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use tensor_rpc::{ElementType, HostBackend, RpcClient, RpcServer, ServerConfig, WireTensor};
//!
//! #[tokio::main]
//! async fn main() -> tensor_rpc::Result<()> {
//!     let server = RpcServer::start(ServerConfig::default(), Arc::new(HostBackend::default())).await?;
//!     let client = RpcClient::connect(server.addr()).await?;
//!
//!     let buffer = client.alloc_buffer(1024).await?;
//!     let base = client.buffer_get_base(buffer.handle).await?.unwrap_or_default();
//!     let tensor = WireTensor::new(1, ElementType::F32, [16, 1, 1, 1])
//!         .with_storage(buffer.handle, base);
//!
//!     client.set_tensor(&tensor, 0, &[0u8; 64]).await?;
//!     let data = client.get_tensor(&tensor, 0, 64).await?;
//!     println!("Read back {:?} bytes", data.map(|d| d.len()));
//!
//!     client.free_buffer(buffer.handle).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod graph;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod server;
pub mod tensor;

// Re-export commonly used types
pub use backend::{Backend, BufferInfo, DeviceMemory, GraphStatus, HostBackend};
pub use client::{RemoteBuffer, RpcClient};
pub use config::{RpcConfig, ServerConfig};
pub use error::{Result, RpcError};
pub use graph::ComputeGraph;
pub use protocol::{Command, GraphComputeReq, Request, Response, ResponseFrame, WireTensor};
pub use queue::TaskQueue;
pub use registry::ObjectRegistry;
pub use server::{ConnectionState, RpcServer, RpcServerHandle};
pub use tensor::{ElementType, Storage, Tensor, TensorOp};
