//! Compute device abstraction.
//!
//! A [`Backend`] owns physical memory and executes graphs. The server never
//! trusts a handle it receives from the wire: the registry checks its live set
//! before any handle reaches a backend method.

pub mod host;

pub use host::HostBackend;

use crate::graph::ComputeGraph;
use crate::tensor::Tensor;
use crate::Result;
use serde::{Deserialize, Serialize};

/// A buffer as reported by the backend right after allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Opaque, non-zero handle.
    pub handle: u64,
    /// Address of the first byte, as seen by the device.
    pub base: u64,
    pub size: u64,
}

/// Free and total device memory in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMemory {
    pub free: u64,
    pub total: u64,
}

/// Outcome of a graph execution, carried as one byte on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GraphStatus {
    Success,
    Failed,
    AllocFailed,
    Aborted,
}

impl GraphStatus {
    pub fn code(self) -> u8 {
        match self {
            GraphStatus::Success => 0,
            GraphStatus::Failed => 1,
            GraphStatus::AllocFailed => 2,
            GraphStatus::Aborted => 3,
        }
    }

    /// Unknown codes are reported as `Failed`.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => GraphStatus::Success,
            2 => GraphStatus::AllocFailed,
            3 => GraphStatus::Aborted,
            _ => GraphStatus::Failed,
        }
    }

    pub fn is_success(self) -> bool {
        self == GraphStatus::Success
    }
}

/// Trait for compute devices served over RPC.
///
/// Methods take `&self`; implementations synchronize internally because one
/// backend is shared by every connection.
pub trait Backend: Send + Sync {
    fn name(&self) -> &str;

    /// Required alignment of tensor data inside a buffer.
    fn alignment(&self) -> u64;

    /// Largest single buffer the device can allocate.
    fn max_size(&self) -> u64;

    fn alloc_buffer(&self, size: u64) -> Result<BufferInfo>;

    fn free_buffer(&self, handle: u64) -> Result<()>;

    fn buffer_base(&self, handle: u64) -> Result<u64>;

    fn buffer_size(&self, handle: u64) -> Result<u64>;

    /// Fill the whole buffer with `value`.
    fn clear_buffer(&self, handle: u64, value: u8) -> Result<()>;

    /// Write `data` at `offset` bytes from the buffer base.
    fn write(&self, handle: u64, offset: u64, data: &[u8]) -> Result<()>;

    /// Read `len` bytes at `offset` bytes from the buffer base.
    fn read(&self, handle: u64, offset: u64, len: u64) -> Result<Vec<u8>>;

    /// Bytes a buffer must provide for `tensor`.
    fn alloc_size(&self, tensor: &Tensor) -> Result<u64> {
        tensor.nbytes()
    }

    /// Device-specific setup for a tensor placed in one of its buffers.
    fn init_tensor(&self, _tensor: &Tensor) -> Result<()> {
        Ok(())
    }

    /// Copy `src` into `dst`. Returns `false` when the device cannot copy
    /// between these two tensors.
    fn copy_tensor(&self, src: &Tensor, dst: &Tensor) -> Result<bool> {
        let (Some(from), Some(to)) = (src.storage, dst.storage) else {
            return Ok(false);
        };
        if src.ty != dst.ty {
            return Ok(false);
        }
        let len = src.nbytes()?;
        if len != dst.nbytes()? {
            return Ok(false);
        }
        let bytes = self.read(from.buffer, from.offset, len)?;
        self.write(to.buffer, to.offset, &bytes)?;
        Ok(true)
    }

    fn graph_compute(&self, graph: &ComputeGraph) -> GraphStatus;

    fn device_memory(&self) -> DeviceMemory;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_status_codes() {
        for status in [
            GraphStatus::Success,
            GraphStatus::Failed,
            GraphStatus::AllocFailed,
            GraphStatus::Aborted,
        ] {
            assert_eq!(GraphStatus::from_code(status.code()), status);
        }
        assert_eq!(GraphStatus::from_code(200), GraphStatus::Failed);
        assert!(GraphStatus::Success.is_success());
    }
}
