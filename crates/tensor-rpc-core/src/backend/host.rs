//! In-process backend that keeps buffers in host memory.
//!
//! Kernels work in `f32` and convert on load and store, so F16 and BF16
//! tensors go through the same element-wise paths as F32.

use super::{Backend, BufferInfo, DeviceMemory, GraphStatus};
use crate::config::RpcConfig;
use crate::graph::ComputeGraph;
use crate::tensor::{ElementType, Tensor, TensorOp};
use crate::{Result, RpcError};
use half::{bf16, f16};
use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

type Buffers = HashMap<u64, Vec<u8>>;

struct HostState {
    buffers: Buffers,
    next_handle: u64,
    used: u64,
}

/// Host memory backend with a fixed memory budget.
pub struct HostBackend {
    total_memory: u64,
    state: Mutex<HostState>,
}

impl HostBackend {
    pub fn new(total_memory: u64) -> Self {
        Self {
            total_memory,
            state: Mutex::new(HostState {
                buffers: HashMap::new(),
                next_handle: 1,
                used: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.lock().buffers.len()
    }
}

impl Default for HostBackend {
    fn default() -> Self {
        Self::new(RpcConfig::DEFAULT_HOST_MEMORY)
    }
}

impl std::fmt::Debug for HostBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("HostBackend")
            .field("total_memory", &self.total_memory)
            .field("used", &state.used)
            .field("buffers", &state.buffers.len())
            .finish()
    }
}

fn buffer(buffers: &Buffers, handle: u64) -> Result<&Vec<u8>> {
    buffers.get(&handle).ok_or(RpcError::UnknownBuffer(handle))
}

fn buffer_mut(buffers: &mut Buffers, handle: u64) -> Result<&mut Vec<u8>> {
    buffers.get_mut(&handle).ok_or(RpcError::UnknownBuffer(handle))
}

fn byte_range(buffer_len: usize, offset: u64, len: u64) -> Result<Range<usize>> {
    offset
        .checked_add(len)
        .filter(|end| *end <= buffer_len as u64)
        .map(|end| offset as usize..end as usize)
        .ok_or_else(|| {
            RpcError::out_of_bounds(format!(
                "[{}, {}+{}) outside buffer of {} bytes",
                offset, offset, len, buffer_len
            ))
        })
}

impl Backend for HostBackend {
    fn name(&self) -> &str {
        "host"
    }

    fn alignment(&self) -> u64 {
        RpcConfig::HOST_ALIGNMENT
    }

    fn max_size(&self) -> u64 {
        self.total_memory
    }

    fn alloc_buffer(&self, size: u64) -> Result<BufferInfo> {
        let mut state = self.lock();
        if size > self.total_memory - state.used {
            return Err(RpcError::AllocationFailed { size });
        }
        let len = usize::try_from(size).map_err(|_| RpcError::AllocationFailed { size })?;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| RpcError::AllocationFailed { size })?;
        data.resize(len, 0);

        let handle = state.next_handle;
        state.next_handle += 1;
        let base = data.as_ptr() as u64;
        state.buffers.insert(handle, data);
        state.used += size;

        debug!("Host buffer {} allocated: {} bytes at {:#x}", handle, size, base);
        Ok(BufferInfo { handle, base, size })
    }

    fn free_buffer(&self, handle: u64) -> Result<()> {
        let mut state = self.lock();
        let data = state
            .buffers
            .remove(&handle)
            .ok_or(RpcError::UnknownBuffer(handle))?;
        state.used -= data.len() as u64;
        debug!("Host buffer {} freed", handle);
        Ok(())
    }

    fn buffer_base(&self, handle: u64) -> Result<u64> {
        let state = self.lock();
        Ok(buffer(&state.buffers, handle)?.as_ptr() as u64)
    }

    fn buffer_size(&self, handle: u64) -> Result<u64> {
        let state = self.lock();
        Ok(buffer(&state.buffers, handle)?.len() as u64)
    }

    fn clear_buffer(&self, handle: u64, value: u8) -> Result<()> {
        let mut state = self.lock();
        buffer_mut(&mut state.buffers, handle)?.fill(value);
        Ok(())
    }

    fn write(&self, handle: u64, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        let buf = buffer_mut(&mut state.buffers, handle)?;
        let range = byte_range(buf.len(), offset, data.len() as u64)?;
        buf[range].copy_from_slice(data);
        Ok(())
    }

    fn read(&self, handle: u64, offset: u64, len: u64) -> Result<Vec<u8>> {
        let state = self.lock();
        let buf = buffer(&state.buffers, handle)?;
        let range = byte_range(buf.len(), offset, len)?;
        Ok(buf[range].to_vec())
    }

    fn graph_compute(&self, graph: &ComputeGraph) -> GraphStatus {
        let mut state = self.lock();
        for tensor in graph.tensors() {
            if let Err(e) = compute(&mut state.buffers, graph, tensor) {
                warn!("Host compute failed at tensor {} ({}): {}", tensor.id, tensor.name, e);
                return GraphStatus::Failed;
            }
        }
        debug!(
            "Host graph computed: {} tensors, {} nodes",
            graph.len(),
            graph.n_nodes()
        );
        GraphStatus::Success
    }

    fn device_memory(&self) -> DeviceMemory {
        let state = self.lock();
        DeviceMemory {
            free: self.total_memory - state.used,
            total: self.total_memory,
        }
    }
}

fn kernel_error(tensor: &Tensor, message: impl std::fmt::Display) -> RpcError {
    RpcError::Backend {
        message: format!("tensor {}: {}", tensor.id, message),
    }
}

fn source<'g>(graph: &'g ComputeGraph, tensor: &Tensor, slot: usize) -> Result<&'g Tensor> {
    tensor.src[slot]
        .and_then(|index| graph.get(index))
        .ok_or_else(|| kernel_error(tensor, format!("missing source {}", slot)))
}

fn same_shape(a: &Tensor, b: &Tensor) -> Result<()> {
    if a.ne != b.ne {
        return Err(kernel_error(
            a,
            format!("shape {:?} does not match source shape {:?}", a.ne, b.ne),
        ));
    }
    Ok(())
}

fn compute(buffers: &mut Buffers, graph: &ComputeGraph, node: &Tensor) -> Result<()> {
    let op = node
        .op()
        .ok_or_else(|| kernel_error(node, format!("unsupported op {}", node.op)))?;

    let values = match op {
        TensorOp::None
        | TensorOp::Reshape
        | TensorOp::View
        | TensorOp::Permute
        | TensorOp::Transpose => return Ok(()),
        TensorOp::Dup | TensorOp::Cpy => {
            let src = source(graph, node, 0)?;
            if src.nelements() != node.nelements() {
                return Err(kernel_error(node, "element count differs from source"));
            }
            load(buffers, src)?
        }
        TensorOp::Neg => {
            let src = source(graph, node, 0)?;
            same_shape(node, src)?;
            load(buffers, src)?.into_iter().map(|x| -x).collect()
        }
        TensorOp::Scale => {
            let src = source(graph, node, 0)?;
            same_shape(node, src)?;
            let factor = node.op_param_f32(0);
            load(buffers, src)?.into_iter().map(|x| x * factor).collect()
        }
        TensorOp::Add | TensorOp::Sub | TensorOp::Mul | TensorOp::Div => {
            let a = source(graph, node, 0)?;
            let b = source(graph, node, 1)?;
            same_shape(node, a)?;
            let f: fn(f32, f32) -> f32 = match op {
                TensorOp::Add => |x, y| x + y,
                TensorOp::Sub => |x, y| x - y,
                TensorOp::Mul => |x, y| x * y,
                _ => |x, y| x / y,
            };
            broadcast(a, &load(buffers, a)?, b, &load(buffers, b)?, f)?
        }
    };

    store(buffers, node, &values)
}

/// Apply `f` element-wise, repeating `b` along every dimension it divides.
fn broadcast(
    a: &Tensor,
    a_values: &[f32],
    b: &Tensor,
    b_values: &[f32],
    f: fn(f32, f32) -> f32,
) -> Result<Vec<f32>> {
    let [n0, n1, n2, n3] = a.ne;
    let [m0, m1, m2, m3] = b.ne;
    if b.ne.iter().zip(a.ne.iter()).any(|(m, n)| *m == 0 || n % m != 0) {
        return Err(kernel_error(
            a,
            format!("cannot broadcast {:?} over {:?}", b.ne, a.ne),
        ));
    }
    if a.nelements() == 0 {
        return Ok(Vec::new());
    }

    let mut out = Vec::with_capacity(a_values.len());
    let mut values = a_values.iter();
    for i3 in 0..n3 {
        for i2 in 0..n2 {
            for i1 in 0..n1 {
                let row = m0 * ((i1 % m1) + m1 * ((i2 % m2) + m2 * (i3 % m3)));
                for i0 in 0..n0 {
                    let (Some(x), Some(y)) = (values.next(), b_values.get((row + i0 % m0) as usize))
                    else {
                        return Err(kernel_error(a, "operand shorter than its shape"));
                    };
                    out.push(f(*x, *y));
                }
            }
        }
    }
    Ok(out)
}

/// Byte offsets of every element relative to the tensor's storage, in
/// logical order (dimension 0 fastest).
fn element_offsets(tensor: &Tensor, buffer_len: usize) -> Result<Vec<u64>> {
    // A layout with more elements than the buffer has bytes can only come
    // from zero strides; refuse it rather than expand it.
    let count = tensor.nelements();
    if count > buffer_len as u64 {
        return Err(kernel_error(
            tensor,
            format!("{} elements exceed a {} byte buffer", count, buffer_len),
        ));
    }
    if count == 0 {
        return Ok(Vec::new());
    }

    let [n0, n1, n2, n3] = tensor.ne;
    let [s0, s1, s2, s3] = tensor.nb;
    let mut offsets = Vec::with_capacity(count as usize);
    for i3 in 0..n3 {
        for i2 in 0..n2 {
            for i1 in 0..n1 {
                let row = (i1.saturating_mul(s1))
                    .saturating_add(i2.saturating_mul(s2))
                    .saturating_add(i3.saturating_mul(s3));
                for i0 in 0..n0 {
                    offsets.push(row.saturating_add(i0.saturating_mul(s0)));
                }
            }
        }
    }
    Ok(offsets)
}

fn decode(ty: ElementType, raw: &[u8]) -> f32 {
    match ty {
        ElementType::F16 => f16::from_le_bytes([raw[0], raw[1]]).to_f32(),
        ElementType::BF16 => bf16::from_le_bytes([raw[0], raw[1]]).to_f32(),
        _ => f32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
    }
}

fn encode(ty: ElementType, value: f32, raw: &mut [u8]) {
    match ty {
        ElementType::F16 => raw.copy_from_slice(&f16::from_f32(value).to_le_bytes()),
        ElementType::BF16 => raw.copy_from_slice(&bf16::from_f32(value).to_le_bytes()),
        _ => raw.copy_from_slice(&value.to_le_bytes()),
    }
}

fn check_float(tensor: &Tensor) -> Result<()> {
    match tensor.ty {
        ElementType::F32 | ElementType::F16 | ElementType::BF16 => Ok(()),
        other => Err(kernel_error(tensor, format!("{} is not supported by host kernels", other))),
    }
}

fn element_range(tensor: &Tensor, base: u64, offset: u64, buffer_len: usize) -> Result<Range<usize>> {
    let start = base
        .checked_add(offset)
        .ok_or_else(|| kernel_error(tensor, "element offset overflows"))?;
    byte_range(buffer_len, start, tensor.ty.size())
}

fn load(buffers: &Buffers, tensor: &Tensor) -> Result<Vec<f32>> {
    check_float(tensor)?;
    let storage = tensor
        .storage
        .ok_or_else(|| kernel_error(tensor, "no storage"))?;
    let data = buffer(buffers, storage.buffer)?;

    element_offsets(tensor, data.len())?
        .into_iter()
        .map(|offset| {
            let range = element_range(tensor, storage.offset, offset, data.len())?;
            Ok(decode(tensor.ty, &data[range]))
        })
        .collect()
}

fn store(buffers: &mut Buffers, tensor: &Tensor, values: &[f32]) -> Result<()> {
    check_float(tensor)?;
    let storage = tensor
        .storage
        .ok_or_else(|| kernel_error(tensor, "no storage"))?;
    let data = buffer_mut(buffers, storage.buffer)?;

    let offsets = element_offsets(tensor, data.len())?;
    if offsets.len() != values.len() {
        return Err(kernel_error(
            tensor,
            format!("{} results for {} elements", values.len(), offsets.len()),
        ));
    }
    for (offset, value) in offsets.into_iter().zip(values) {
        let range = element_range(tensor, storage.offset, offset, data.len())?;
        encode(tensor.ty, *value, &mut data[range]);
    }
    Ok(())
}
