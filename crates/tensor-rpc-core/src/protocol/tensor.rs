//! The packed wire tensor descriptor.

use super::{MAX_DIMS, MAX_NAME, MAX_SRC, OP_PARAMS_LEN};
use crate::tensor::{ElementType, TensorOp};
use crate::{Result, RpcError};
use bytes::{Buf, BufMut};

/// One tensor as it travels on the wire.
///
/// Layout (296 bytes, little-endian, no implicit padding):
///
/// ```text
/// id u64 | type u32 | buffer u64 | ne u32x4 | nb u32x4 | op u32
/// op_params i32x16 | flags i32 | src u64x10 | view_src u64 | view_offs u64
/// data u64 | name u8x64 | padding u8x4
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireTensor {
    pub id: u64,
    pub ty: u32,
    pub buffer: u64,
    pub ne: [u32; MAX_DIMS],
    pub nb: [u32; MAX_DIMS],
    pub op: u32,
    pub op_params: [i32; OP_PARAMS_LEN],
    pub flags: i32,
    pub src: [u64; MAX_SRC],
    pub view_src: u64,
    pub view_offs: u64,
    pub data: u64,
    pub name: [u8; MAX_NAME],
}

const PADDING: usize = 4;

const _: () = assert!(WireTensor::SIZE % 8 == 0, "wire tensor size must be a multiple of 8");

impl Default for WireTensor {
    fn default() -> Self {
        Self {
            id: 0,
            ty: 0,
            buffer: 0,
            ne: [0; MAX_DIMS],
            nb: [0; MAX_DIMS],
            op: 0,
            op_params: [0; OP_PARAMS_LEN],
            flags: 0,
            src: [0; MAX_SRC],
            view_src: 0,
            view_offs: 0,
            data: 0,
            name: [0; MAX_NAME],
        }
    }
}

impl WireTensor {
    pub const SIZE: usize = 8
        + 4
        + 8
        + 4 * MAX_DIMS
        + 4 * MAX_DIMS
        + 4
        + 4 * OP_PARAMS_LEN
        + 4
        + 8 * MAX_SRC
        + 8
        + 8
        + 8
        + MAX_NAME
        + PADDING;

    /// A contiguous tensor of the given type and shape with no storage and no op.
    pub fn new(id: u64, ty: ElementType, ne: [u32; MAX_DIMS]) -> Self {
        let mut nb = [0u32; MAX_DIMS];
        nb[0] = ty.size() as u32;
        for i in 1..MAX_DIMS {
            nb[i] = nb[i - 1].saturating_mul(ne[i - 1]);
        }
        Self {
            id,
            ty: ty.tag(),
            ne,
            nb,
            ..Default::default()
        }
    }

    /// Place the tensor at server address `data` inside buffer `buffer`.
    pub fn with_storage(mut self, buffer: u64, data: u64) -> Self {
        self.buffer = buffer;
        self.data = data;
        self
    }

    /// Set the op and its source ids (at most [`MAX_SRC`]; extras are ignored).
    pub fn with_op(mut self, op: TensorOp, sources: &[u64]) -> Self {
        self.op = op.tag();
        self.src = [0; MAX_SRC];
        for (slot, id) in self.src.iter_mut().zip(sources) {
            *slot = *id;
        }
        self
    }

    pub fn with_view(mut self, view_src: u64, view_offs: u64) -> Self {
        self.view_src = view_src;
        self.view_offs = view_offs;
        self
    }

    pub fn with_op_param_f32(mut self, index: usize, value: f32) -> Self {
        if let Some(slot) = self.op_params.get_mut(index) {
            *slot = value.to_bits() as i32;
        }
        self
    }

    /// Set the name, truncated to fit the field with a trailing NUL.
    pub fn with_name(mut self, name: &str) -> Self {
        self.name = [0; MAX_NAME];
        let bytes = name.as_bytes();
        let len = bytes.len().min(MAX_NAME - 1);
        self.name[..len].copy_from_slice(&bytes[..len]);
        self
    }

    /// The name up to the first NUL.
    pub fn name_str(&self) -> String {
        let end = self.name.iter().position(|b| *b == 0).unwrap_or(MAX_NAME);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    pub fn put(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.id);
        buf.put_u32_le(self.ty);
        buf.put_u64_le(self.buffer);
        for n in self.ne {
            buf.put_u32_le(n);
        }
        for n in self.nb {
            buf.put_u32_le(n);
        }
        buf.put_u32_le(self.op);
        for p in self.op_params {
            buf.put_i32_le(p);
        }
        buf.put_i32_le(self.flags);
        for s in self.src {
            buf.put_u64_le(s);
        }
        buf.put_u64_le(self.view_src);
        buf.put_u64_le(self.view_offs);
        buf.put_u64_le(self.data);
        buf.put_slice(&self.name);
        buf.put_bytes(0, PADDING);
    }

    /// Read one descriptor. The caller guarantees `buf.remaining() >= SIZE`.
    pub(crate) fn get(buf: &mut impl Buf) -> Self {
        let mut tensor = WireTensor {
            id: buf.get_u64_le(),
            ty: buf.get_u32_le(),
            buffer: buf.get_u64_le(),
            ..Default::default()
        };
        for n in tensor.ne.iter_mut() {
            *n = buf.get_u32_le();
        }
        for n in tensor.nb.iter_mut() {
            *n = buf.get_u32_le();
        }
        tensor.op = buf.get_u32_le();
        for p in tensor.op_params.iter_mut() {
            *p = buf.get_i32_le();
        }
        tensor.flags = buf.get_i32_le();
        for s in tensor.src.iter_mut() {
            *s = buf.get_u64_le();
        }
        tensor.view_src = buf.get_u64_le();
        tensor.view_offs = buf.get_u64_le();
        tensor.data = buf.get_u64_le();
        buf.copy_to_slice(&mut tensor.name);
        buf.advance(PADDING);
        tensor
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::SIZE);
        self.put(&mut out);
        out
    }

    /// Decode from exactly [`WireTensor::SIZE`] bytes.
    pub fn from_bytes(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() != Self::SIZE {
            return Err(RpcError::SizeMismatch {
                expected: Self::SIZE as u64,
                actual: bytes.len() as u64,
            });
        }
        Ok(Self::get(&mut bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_size() {
        assert_eq!(WireTensor::SIZE, 296);
        assert_eq!(WireTensor::default().to_bytes().len(), WireTensor::SIZE);
    }

    #[test]
    fn test_field_offsets_are_packed() {
        let tensor = WireTensor {
            id: 0x0102030405060708,
            ty: 26,
            buffer: 0xAA,
            ..Default::default()
        };
        let bytes = tensor.to_bytes();
        assert_eq!(&bytes[0..8], &0x0102030405060708u64.to_le_bytes());
        assert_eq!(&bytes[8..12], &26u32.to_le_bytes());
        assert_eq!(&bytes[12..20], &0xAAu64.to_le_bytes());
    }

    #[test]
    fn test_descriptor_roundtrip_preserves_every_field() {
        let tensor = WireTensor::new(7, ElementType::F16, [8, 2, 1, 1])
            .with_storage(3, 0x1000)
            .with_op(TensorOp::Add, &[5, 6])
            .with_view(4, 16)
            .with_op_param_f32(0, 0.5)
            .with_name("layer.0.attn");

        let decoded = WireTensor::from_bytes(&tensor.to_bytes()).unwrap();
        assert_eq!(decoded, tensor);
        assert_eq!(decoded.name_str(), "layer.0.attn");
        assert_eq!(decoded.nb, [2, 16, 32, 32]);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let bytes = vec![0u8; WireTensor::SIZE - 1];
        assert!(matches!(
            WireTensor::from_bytes(&bytes),
            Err(RpcError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_long_name_truncated_with_nul() {
        let long = "x".repeat(MAX_NAME * 2);
        let tensor = WireTensor::default().with_name(&long);
        assert_eq!(tensor.name_str().len(), MAX_NAME - 1);
        assert_eq!(tensor.name[MAX_NAME - 1], 0);
    }
}
