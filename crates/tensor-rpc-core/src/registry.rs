//! Per-connection registry of remote objects.
//!
//! Every buffer handle a client sends is checked against the set of handles
//! this connection allocated before it reaches the backend, and every tensor
//! descriptor is bounds-checked against its buffer before any byte moves.

use crate::backend::Backend;
use crate::graph::ComputeGraph;
use crate::protocol::{
    AllocBufferReq, AllocBufferRsp, BufferClearReq, BufferGetBaseReq, BufferGetBaseRsp,
    CopyTensorReq, CopyTensorRsp, DeviceMemoryRsp, FreeBufferReq, GetAlignmentRsp,
    GetAllocSizeReq, GetAllocSizeRsp, GetMaxSizeRsp, GetTensorReq, GraphComputeReq,
    GraphComputeRsp, InitTensorReq, Request, Response, ResponseFrame, SetTensorReq, WireTensor,
};
use crate::tensor::{Storage, Tensor};
use crate::{Result, RpcError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Remote objects owned by one client connection.
///
/// Dropping the registry frees every buffer it still owns.
pub struct ObjectRegistry {
    backend: Arc<dyn Backend>,
    buffers: HashSet<u64>,
}

impl ObjectRegistry {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self {
            backend,
            buffers: HashSet::new(),
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Number of buffers this connection currently owns.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn owns(&self, handle: u64) -> bool {
        self.buffers.contains(&handle)
    }

    fn check_live(&self, handle: u64) -> Result<()> {
        if self.owns(handle) {
            Ok(())
        } else {
            Err(RpcError::UnknownBuffer(handle))
        }
    }

    /// Run one request and build its response frame.
    ///
    /// Handler failures are logged and answered with a zero-filled failure
    /// frame of the same length as a success.
    pub fn execute(&mut self, request: Request) -> ResponseFrame {
        match self.dispatch(&request) {
            Ok(response) => ResponseFrame::ok(response),
            Err(e) => {
                warn!("{} failed: {}", request.command(), e);
                ResponseFrame::failed(request.failure_response())
            }
        }
    }

    fn dispatch(&mut self, request: &Request) -> Result<Response> {
        let response = match request {
            Request::AllocBuffer(req) => Response::AllocBuffer(self.alloc_buffer(req)),
            Request::GetAlignment => Response::GetAlignment(self.get_alignment()),
            Request::GetMaxSize => Response::GetMaxSize(self.get_max_size()),
            Request::BufferGetBase(req) => Response::BufferGetBase(self.buffer_get_base(req)?),
            Request::FreeBuffer(req) => {
                self.free_buffer(req)?;
                Response::FreeBuffer
            }
            Request::BufferClear(req) => {
                self.buffer_clear(req)?;
                Response::BufferClear
            }
            Request::SetTensor(payload) => {
                self.set_tensor(payload)?;
                Response::SetTensor
            }
            Request::GetTensor(req) => Response::GetTensor(self.get_tensor(req)?),
            Request::CopyTensor(req) => Response::CopyTensor(self.copy_tensor(req)?),
            Request::GraphCompute(payload) => Response::GraphCompute(self.graph_compute(payload)?),
            Request::GetDeviceMemory => Response::GetDeviceMemory(self.get_device_memory()),
            Request::InitTensor(req) => {
                self.init_tensor(req)?;
                Response::InitTensor
            }
            Request::GetAllocSize(req) => Response::GetAllocSize(self.get_alloc_size(req)?),
        };
        Ok(response)
    }

    /// Allocate a buffer. A backend failure is reported as handle 0, size 0.
    pub fn alloc_buffer(&mut self, req: &AllocBufferReq) -> AllocBufferRsp {
        match self.backend.alloc_buffer(req.size) {
            Ok(info) => {
                self.buffers.insert(info.handle);
                debug!(
                    "Allocated buffer {:#x}: {} bytes at {:#x}",
                    info.handle, info.size, info.base
                );
                AllocBufferRsp {
                    remote_ptr: info.handle,
                    remote_size: info.size,
                }
            }
            Err(e) => {
                warn!("Buffer allocation of {} bytes failed: {}", req.size, e);
                AllocBufferRsp::default()
            }
        }
    }

    pub fn get_alignment(&self) -> GetAlignmentRsp {
        GetAlignmentRsp {
            alignment: self.backend.alignment(),
        }
    }

    pub fn get_max_size(&self) -> GetMaxSizeRsp {
        GetMaxSizeRsp {
            max_size: self.backend.max_size(),
        }
    }

    pub fn buffer_get_base(&self, req: &BufferGetBaseReq) -> Result<BufferGetBaseRsp> {
        self.check_live(req.remote_ptr)?;
        Ok(BufferGetBaseRsp {
            base_ptr: self.backend.buffer_base(req.remote_ptr)?,
        })
    }

    pub fn free_buffer(&mut self, req: &FreeBufferReq) -> Result<()> {
        self.check_live(req.remote_ptr)?;
        self.backend.free_buffer(req.remote_ptr)?;
        self.buffers.remove(&req.remote_ptr);
        debug!("Freed buffer {:#x}", req.remote_ptr);
        Ok(())
    }

    pub fn buffer_clear(&self, req: &BufferClearReq) -> Result<()> {
        self.check_live(req.remote_ptr)?;
        self.backend.clear_buffer(req.remote_ptr, req.value)
    }

    /// Write raw bytes into a tensor. Payload: `tensor | offset u64 | data`.
    pub fn set_tensor(&self, payload: &[u8]) -> Result<()> {
        let req = SetTensorReq::decode(payload)?;
        let tensor = self.deserialize_tensor(&req.tensor, None)?;
        let (handle, start) = self.data_range(&tensor, req.offset, req.data.len() as u64)?;
        self.backend.write(handle, start, &req.data)
    }

    pub fn get_tensor(&self, req: &GetTensorReq) -> Result<Vec<u8>> {
        let tensor = self.deserialize_tensor(&req.tensor, None)?;
        let (handle, start) = self.data_range(&tensor, req.offset, req.size)?;
        self.backend.read(handle, start, req.size)
    }

    pub fn copy_tensor(&self, req: &CopyTensorReq) -> Result<CopyTensorRsp> {
        let src = self.deserialize_tensor(&req.src, None)?;
        let dst = self.deserialize_tensor(&req.dst, None)?;
        let src_size = src.nbytes()?;
        // The copy writes the source footprint at the destination address.
        self.data_range(&src, 0, src_size)?;
        self.data_range(&dst, 0, src_size)?;

        let copied = self.backend.copy_tensor(&src, &dst)?;
        if !copied {
            debug!(
                "Backend declined copy {} ({}) -> {} ({})",
                src.id, src.ty, dst.id, dst.ty
            );
        }
        Ok(CopyTensorRsp {
            result: u8::from(copied),
        })
    }

    pub fn init_tensor(&self, req: &InitTensorReq) -> Result<()> {
        let tensor = self.deserialize_tensor(&req.tensor, None)?;
        if tensor.buffer.is_none() {
            return Err(RpcError::invalid_tensor(tensor.id, "init requires a buffer"));
        }
        self.backend.init_tensor(&tensor)
    }

    pub fn get_alloc_size(&self, req: &GetAllocSizeReq) -> Result<GetAllocSizeRsp> {
        let tensor = self.deserialize_tensor(&req.tensor, None)?;
        Ok(GetAllocSizeRsp {
            alloc_size: self.backend.alloc_size(&tensor)?,
        })
    }

    pub fn get_device_memory(&self) -> DeviceMemoryRsp {
        let memory = self.backend.device_memory();
        DeviceMemoryRsp {
            free_mem: memory.free,
            total_mem: memory.total,
        }
    }

    /// Rebuild and execute a graph. Payload layout is described on
    /// [`GraphComputeReq`].
    pub fn graph_compute(&self, payload: &[u8]) -> Result<GraphComputeRsp> {
        let req = GraphComputeReq::decode(payload)?;
        let graph = ComputeGraph::build(&req, |wire, view_src| {
            self.deserialize_tensor(wire, view_src)
        })?;
        debug!(
            "Computing graph: {} nodes, {} tensors ({} sent)",
            graph.n_nodes(),
            graph.len(),
            req.tensors.len()
        );
        let status = self.backend.graph_compute(&graph);
        Ok(GraphComputeRsp {
            result: status.code(),
        })
    }

    /// Validate one descriptor and resolve where its bytes live.
    ///
    /// `view_src` is only supplied during a graph build. A view without a
    /// buffer of its own aliases its source's storage at `view_offs`.
    pub fn deserialize_tensor(&self, wire: &WireTensor, view_src: Option<&Tensor>) -> Result<Tensor> {
        let mut tensor = Tensor::from_wire(wire)?;
        let footprint = tensor.nbytes()?;

        if wire.buffer != 0 {
            self.check_live(wire.buffer)?;
            tensor.buffer = Some(wire.buffer);
            let size = self.backend.buffer_size(wire.buffer)?;
            if footprint > size {
                return Err(RpcError::out_of_bounds(format!(
                    "tensor {} needs {} bytes, buffer {:#x} holds {}",
                    wire.id, footprint, wire.buffer, size
                )));
            }
            if wire.data != 0 {
                let base = self.backend.buffer_base(wire.buffer)?;
                let end = base.saturating_add(size);
                let fits = wire.data >= base
                    && wire.data < end
                    && wire
                        .data
                        .checked_add(footprint)
                        .is_some_and(|data_end| data_end <= end);
                if !fits {
                    return Err(RpcError::out_of_bounds(format!(
                        "tensor {} data {:#x}+{} outside buffer {:#x} [{:#x}, {:#x})",
                        wire.id, wire.data, footprint, wire.buffer, base, end
                    )));
                }
                tensor.storage = Some(Storage {
                    buffer: wire.buffer,
                    offset: wire.data - base,
                });
            }
        } else if wire.data != 0 {
            return Err(RpcError::invalid_tensor(wire.id, "data address without a buffer"));
        }

        if let (None, Some(src)) = (tensor.storage, view_src) {
            let src_storage = src.storage.ok_or_else(|| {
                RpcError::invalid_tensor(wire.id, format!("views tensor {} which has no data", src.id))
            })?;
            let offset = src_storage
                .offset
                .checked_add(wire.view_offs)
                .ok_or_else(|| RpcError::out_of_bounds(format!("tensor {} view offset overflows", wire.id)))?;
            let size = self.backend.buffer_size(src_storage.buffer)?;
            if offset.checked_add(footprint).map_or(true, |end| end > size) {
                return Err(RpcError::out_of_bounds(format!(
                    "tensor {} view at {}+{} outside buffer of {} bytes",
                    wire.id, offset, footprint, size
                )));
            }
            tensor.buffer = Some(src_storage.buffer);
            tensor.storage = Some(Storage {
                buffer: src_storage.buffer,
                offset,
            });
        }

        Ok(tensor)
    }

    /// Check that `len` bytes at `offset` from the tensor's data lie inside
    /// its buffer. Returns the buffer and the absolute offset into it.
    fn data_range(&self, tensor: &Tensor, offset: u64, len: u64) -> Result<(u64, u64)> {
        let storage = tensor
            .storage
            .ok_or_else(|| RpcError::invalid_tensor(tensor.id, "tensor has no data"))?;
        let size = self.backend.buffer_size(storage.buffer)?;
        let start = storage.offset.checked_add(offset);
        let end = start.and_then(|s| s.checked_add(len));
        match (start, end) {
            (Some(start), Some(end)) if end <= size => Ok((storage.buffer, start)),
            _ => Err(RpcError::out_of_bounds(format!(
                "tensor {}: {} bytes at offset {} outside buffer of {} bytes",
                tensor.id,
                len,
                storage.offset.saturating_add(offset),
                size
            ))),
        }
    }
}

impl Drop for ObjectRegistry {
    fn drop(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        debug!("Releasing {} buffers left by connection", self.buffers.len());
        for handle in self.buffers.drain() {
            if let Err(e) = self.backend.free_buffer(handle) {
                warn!("Failed to free buffer {:#x}: {}", handle, e);
            }
        }
    }
}

impl std::fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("backend", &self.backend.name())
            .field("buffers", &self.buffers.len())
            .finish()
    }
}
