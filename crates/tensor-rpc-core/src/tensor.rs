//! Live tensor model shared by the registry, graph builder and backends.

use crate::protocol::{WireTensor, MAX_DIMS, MAX_SRC, OP_PARAMS_LEN};
use crate::{Result, RpcError};

/// Element types accepted on the wire. Tag values are fixed by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    F32,
    F16,
    I8,
    I16,
    I32,
    I64,
    F64,
    BF16,
}

impl ElementType {
    pub fn tag(self) -> u32 {
        match self {
            ElementType::F32 => 0,
            ElementType::F16 => 1,
            ElementType::I8 => 24,
            ElementType::I16 => 25,
            ElementType::I32 => 26,
            ElementType::I64 => 27,
            ElementType::F64 => 28,
            ElementType::BF16 => 30,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ElementType::F32),
            1 => Some(ElementType::F16),
            24 => Some(ElementType::I8),
            25 => Some(ElementType::I16),
            26 => Some(ElementType::I32),
            27 => Some(ElementType::I64),
            28 => Some(ElementType::F64),
            30 => Some(ElementType::BF16),
            _ => None,
        }
    }

    /// Bytes per element.
    pub fn size(self) -> u64 {
        match self {
            ElementType::I8 => 1,
            ElementType::F16 | ElementType::BF16 | ElementType::I16 => 2,
            ElementType::F32 | ElementType::I32 => 4,
            ElementType::I64 | ElementType::F64 => 8,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementType::F32 => "f32",
            ElementType::F16 => "f16",
            ElementType::I8 => "i8",
            ElementType::I16 => "i16",
            ElementType::I32 => "i32",
            ElementType::I64 => "i64",
            ElementType::F64 => "f64",
            ElementType::BF16 => "bf16",
        }
    }
}

impl std::fmt::Display for ElementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Operation tags. The registry never interprets them; backends do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TensorOp {
    None,
    Dup,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Scale,
    Reshape,
    View,
    Permute,
    Transpose,
    Cpy,
}

impl TensorOp {
    pub const ALL: [TensorOp; 13] = [
        TensorOp::None,
        TensorOp::Dup,
        TensorOp::Add,
        TensorOp::Sub,
        TensorOp::Mul,
        TensorOp::Div,
        TensorOp::Neg,
        TensorOp::Scale,
        TensorOp::Reshape,
        TensorOp::View,
        TensorOp::Permute,
        TensorOp::Transpose,
        TensorOp::Cpy,
    ];

    pub fn tag(self) -> u32 {
        match self {
            TensorOp::None => 0,
            TensorOp::Dup => 1,
            TensorOp::Add => 2,
            TensorOp::Sub => 3,
            TensorOp::Mul => 4,
            TensorOp::Div => 5,
            TensorOp::Neg => 6,
            TensorOp::Scale => 7,
            TensorOp::Reshape => 8,
            TensorOp::View => 9,
            TensorOp::Permute => 10,
            TensorOp::Transpose => 11,
            TensorOp::Cpy => 12,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.tag() == tag)
    }

    /// Ops that only reinterpret existing storage.
    pub fn is_view(self) -> bool {
        matches!(
            self,
            TensorOp::Reshape | TensorOp::View | TensorOp::Permute | TensorOp::Transpose
        )
    }
}

/// Where a tensor's bytes live: a live buffer handle and a byte offset from
/// that buffer's base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Storage {
    pub buffer: u64,
    pub offset: u64,
}

/// A tensor reconstructed on the server from a wire descriptor.
///
/// `src` and `view_src` index into the arena of the
/// [`ComputeGraph`](crate::graph::ComputeGraph) that owns the tensor; they are
/// always empty for tensors deserialized outside a graph build.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub id: u64,
    pub ty: ElementType,
    pub ne: [u64; MAX_DIMS],
    pub nb: [u64; MAX_DIMS],
    /// Raw op tag, see [`TensorOp::from_tag`].
    pub op: u32,
    pub op_params: [i32; OP_PARAMS_LEN],
    pub flags: i32,
    pub src: [Option<usize>; MAX_SRC],
    pub view_src: Option<usize>,
    pub view_offs: u64,
    /// Buffer the tensor was declared in, if any.
    pub buffer: Option<u64>,
    /// Resolved location of the tensor data, if it has any yet.
    pub storage: Option<Storage>,
    pub name: String,
}

impl Tensor {
    /// Shape, op and name of a wire descriptor. Storage and graph links are
    /// left empty for the caller to resolve.
    pub fn from_wire(wire: &WireTensor) -> Result<Self> {
        let ty = ElementType::from_tag(wire.ty).ok_or_else(|| {
            RpcError::invalid_tensor(wire.id, format!("unknown element type {}", wire.ty))
        })?;
        Ok(Self {
            id: wire.id,
            ty,
            ne: wire.ne.map(u64::from),
            nb: wire.nb.map(u64::from),
            op: wire.op,
            op_params: wire.op_params,
            flags: wire.flags,
            src: [None; MAX_SRC],
            view_src: None,
            view_offs: wire.view_offs,
            buffer: None,
            storage: None,
            name: wire.name_str(),
        })
    }

    pub fn op(&self) -> Option<TensorOp> {
        TensorOp::from_tag(self.op)
    }

    /// Element count, saturating at `u64::MAX`.
    pub fn nelements(&self) -> u64 {
        self.ne.iter().fold(1u64, |acc, n| acc.saturating_mul(*n))
    }

    /// Byte footprint of the tensor given its strides.
    pub fn nbytes(&self) -> Result<u64> {
        nbytes(self.id, self.ty, &self.ne, &self.nb)
    }

    /// Sources that are set, in slot order.
    pub fn sources(&self) -> impl Iterator<Item = usize> + '_ {
        self.src.iter().flatten().copied()
    }

    pub fn op_param_f32(&self, index: usize) -> f32 {
        self.op_params
            .get(index)
            .map(|bits| f32::from_bits(*bits as u32))
            .unwrap_or(0.0)
    }
}

/// Byte footprint of a strided tensor: one element plus the furthest offset
/// reachable through the strides. Empty tensors occupy zero bytes.
pub fn nbytes(id: u64, ty: ElementType, ne: &[u64; MAX_DIMS], nb: &[u64; MAX_DIMS]) -> Result<u64> {
    if ne.iter().any(|n| *n == 0) {
        return Ok(0);
    }
    let overflow = || RpcError::invalid_tensor(id, "size computation overflows");
    let mut total = ty.size();
    for (n, stride) in ne.iter().zip(nb.iter()) {
        let span = (n - 1).checked_mul(*stride).ok_or_else(overflow)?;
        total = total.checked_add(span).ok_or_else(overflow)?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_type_tags_roundtrip() {
        for ty in [
            ElementType::F32,
            ElementType::F16,
            ElementType::I8,
            ElementType::I16,
            ElementType::I32,
            ElementType::I64,
            ElementType::F64,
            ElementType::BF16,
        ] {
            assert_eq!(ElementType::from_tag(ty.tag()), Some(ty));
        }
        assert_eq!(ElementType::from_tag(2), None);
        assert_eq!(ElementType::from_tag(u32::MAX), None);
    }

    #[test]
    fn test_op_tags_roundtrip() {
        for op in TensorOp::ALL {
            assert_eq!(TensorOp::from_tag(op.tag()), Some(op));
        }
        assert_eq!(TensorOp::from_tag(999), None);
        assert!(TensorOp::View.is_view());
        assert!(!TensorOp::Add.is_view());
    }

    #[test]
    fn test_from_wire_copies_shape_and_name() {
        let wire = WireTensor::new(3, ElementType::F16, [8, 2, 1, 1])
            .with_op(TensorOp::Neg, &[1])
            .with_name("h");
        let tensor = Tensor::from_wire(&wire).unwrap();
        assert_eq!(tensor.id, 3);
        assert_eq!(tensor.ty, ElementType::F16);
        assert_eq!(tensor.ne, [8, 2, 1, 1]);
        assert_eq!(tensor.nb, [2, 16, 32, 32]);
        assert_eq!(tensor.op(), Some(TensorOp::Neg));
        assert_eq!(tensor.name, "h");
        assert!(tensor.storage.is_none());
        assert_eq!(tensor.sources().count(), 0);
        assert_eq!(tensor.nbytes().unwrap(), 32);
    }

    #[test]
    fn test_from_wire_rejects_unknown_type() {
        let wire = WireTensor {
            id: 4,
            ty: 2,
            ..Default::default()
        };
        assert!(matches!(
            Tensor::from_wire(&wire),
            Err(RpcError::InvalidTensor { id: 4, .. })
        ));
    }

    #[test]
    fn test_nbytes_contiguous() {
        let ne = [4, 3, 1, 1];
        let nb = [4, 16, 48, 48];
        assert_eq!(nbytes(1, ElementType::F32, &ne, &nb).unwrap(), 48);
    }

    #[test]
    fn test_nbytes_strided_view() {
        // A column of a 4x3 f32 matrix: three elements, one row apart.
        let ne = [1, 3, 1, 1];
        let nb = [4, 16, 48, 48];
        assert_eq!(nbytes(1, ElementType::F32, &ne, &nb).unwrap(), 36);
    }

    #[test]
    fn test_nbytes_empty() {
        let ne = [0, 3, 1, 1];
        let nb = [4, 0, 0, 0];
        assert_eq!(nbytes(1, ElementType::F32, &ne, &nb).unwrap(), 0);
    }

    #[test]
    fn test_nbytes_overflow_rejected() {
        let ne = [u64::MAX, 2, 1, 1];
        let nb = [u64::MAX, 1, 1, 1];
        let err = nbytes(9, ElementType::F32, &ne, &nb).unwrap_err();
        assert!(matches!(err, RpcError::InvalidTensor { id: 9, .. }));
    }
}
