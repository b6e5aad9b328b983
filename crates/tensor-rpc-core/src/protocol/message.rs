//! Request and response records, one pair per [`Command`].

use super::{Command, WireTensor};
use crate::{Result, RpcError};
use bytes::{Buf, BufMut};

/// Decode a fixed-size record from exactly `T::SIZE` bytes.
fn decode_exact<T: Packed>(mut bytes: &[u8]) -> Result<T> {
    if bytes.len() != T::SIZE {
        return Err(RpcError::SizeMismatch {
            expected: T::SIZE as u64,
            actual: bytes.len() as u64,
        });
    }
    Ok(T::get(&mut bytes))
}

fn encode<T: Packed>(record: &T) -> Vec<u8> {
    let mut out = Vec::with_capacity(T::SIZE);
    record.put(&mut out);
    out
}

/// A fixed-size packed record.
pub(crate) trait Packed: Sized {
    const SIZE: usize;
    fn put(&self, buf: &mut impl BufMut);
    /// The caller guarantees `buf.remaining() >= SIZE`.
    fn get(buf: &mut impl Buf) -> Self;
}

macro_rules! packed_u64_record {
    ($(#[$meta:meta])* $name:ident { $($field:ident),+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name {
            $(pub $field: u64,)+
        }

        impl $name {
            pub const SIZE: usize = 8 * [$(stringify!($field)),+].len();
        }

        impl Packed for $name {
            const SIZE: usize = $name::SIZE;

            fn put(&self, buf: &mut impl BufMut) {
                $(buf.put_u64_le(self.$field);)+
            }

            fn get(buf: &mut impl Buf) -> Self {
                Self { $($field: buf.get_u64_le(),)+ }
            }
        }
    };
}

packed_u64_record!(AllocBufferReq { size });
packed_u64_record!(
    /// `remote_ptr == 0` means the allocation failed.
    AllocBufferRsp { remote_ptr, remote_size }
);
packed_u64_record!(GetAlignmentRsp { alignment });
packed_u64_record!(GetMaxSizeRsp { max_size });
packed_u64_record!(BufferGetBaseReq { remote_ptr });
packed_u64_record!(BufferGetBaseRsp { base_ptr });
packed_u64_record!(FreeBufferReq { remote_ptr });
packed_u64_record!(GetAllocSizeRsp { alloc_size });
packed_u64_record!(DeviceMemoryRsp { free_mem, total_mem });

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferClearReq {
    pub remote_ptr: u64,
    pub value: u8,
}

impl BufferClearReq {
    pub const SIZE: usize = 9;
}

impl Packed for BufferClearReq {
    const SIZE: usize = BufferClearReq::SIZE;

    fn put(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.remote_ptr);
        buf.put_u8(self.value);
    }

    fn get(buf: &mut impl Buf) -> Self {
        Self {
            remote_ptr: buf.get_u64_le(),
            value: buf.get_u8(),
        }
    }
}

macro_rules! status_record {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name {
            pub result: u8,
        }

        impl $name {
            pub const SIZE: usize = 1;
        }

        impl Packed for $name {
            const SIZE: usize = 1;

            fn put(&self, buf: &mut impl BufMut) {
                buf.put_u8(self.result);
            }

            fn get(buf: &mut impl Buf) -> Self {
                Self {
                    result: buf.get_u8(),
                }
            }
        }
    };
}

status_record!(CopyTensorRsp);
status_record!(GraphComputeRsp);

macro_rules! tensor_record {
    ($name:ident) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            pub tensor: WireTensor,
        }

        impl $name {
            pub const SIZE: usize = WireTensor::SIZE;
        }

        impl Packed for $name {
            const SIZE: usize = WireTensor::SIZE;

            fn put(&self, buf: &mut impl BufMut) {
                self.tensor.put(buf);
            }

            fn get(buf: &mut impl Buf) -> Self {
                Self {
                    tensor: WireTensor::get(buf),
                }
            }
        }
    };
}

tensor_record!(InitTensorReq);
tensor_record!(GetAllocSizeReq);

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetTensorReq {
    pub tensor: WireTensor,
    pub offset: u64,
    pub size: u64,
}

impl GetTensorReq {
    pub const SIZE: usize = WireTensor::SIZE + 16;
}

impl Packed for GetTensorReq {
    const SIZE: usize = GetTensorReq::SIZE;

    fn put(&self, buf: &mut impl BufMut) {
        self.tensor.put(buf);
        buf.put_u64_le(self.offset);
        buf.put_u64_le(self.size);
    }

    fn get(buf: &mut impl Buf) -> Self {
        Self {
            tensor: WireTensor::get(buf),
            offset: buf.get_u64_le(),
            size: buf.get_u64_le(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CopyTensorReq {
    pub src: WireTensor,
    pub dst: WireTensor,
}

impl CopyTensorReq {
    pub const SIZE: usize = 2 * WireTensor::SIZE;
}

impl Packed for CopyTensorReq {
    const SIZE: usize = CopyTensorReq::SIZE;

    fn put(&self, buf: &mut impl BufMut) {
        self.src.put(buf);
        self.dst.put(buf);
    }

    fn get(buf: &mut impl Buf) -> Self {
        Self {
            src: WireTensor::get(buf),
            dst: WireTensor::get(buf),
        }
    }
}

/// Variable-length set-tensor payload: `tensor | offset u64 | data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetTensorReq {
    pub tensor: WireTensor,
    pub offset: u64,
    pub data: Vec<u8>,
}

impl SetTensorReq {
    const HEADER: usize = WireTensor::SIZE + 8;

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::HEADER + self.data.len());
        self.tensor.put(&mut out);
        out.put_u64_le(self.offset);
        out.put_slice(&self.data);
        out
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < Self::HEADER {
            return Err(RpcError::malformed(format!(
                "set_tensor payload of {} bytes is shorter than its {} byte header",
                bytes.len(),
                Self::HEADER
            )));
        }
        let tensor = WireTensor::get(&mut bytes);
        let offset = bytes.get_u64_le();
        Ok(Self {
            tensor,
            offset,
            data: bytes.to_vec(),
        })
    }
}

/// Variable-length graph payload:
/// `n_nodes u32 | node ids u64 x n_nodes | n_tensors u32 | tensors`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphComputeReq {
    /// Ids of the graph's output nodes, in execution order.
    pub nodes: Vec<u64>,
    pub tensors: Vec<WireTensor>,
}

impl GraphComputeReq {
    pub fn encoded_len(&self) -> usize {
        4 + 8 * self.nodes.len() + 4 + WireTensor::SIZE * self.tensors.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.put_u32_le(self.nodes.len() as u32);
        for id in &self.nodes {
            out.put_u64_le(*id);
        }
        out.put_u32_le(self.tensors.len() as u32);
        for tensor in &self.tensors {
            tensor.put(&mut out);
        }
        out
    }

    /// Decode and check that the declared counts account for every byte.
    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        let total = bytes.len();
        let short = || RpcError::malformed(format!("graph payload of {} bytes is truncated", total));

        if bytes.remaining() < 4 {
            return Err(short());
        }
        let n_nodes = bytes.get_u32_le() as usize;
        let nodes_len = n_nodes.checked_mul(8).ok_or_else(short)?;
        if bytes.remaining() < nodes_len + 4 {
            return Err(short());
        }
        let nodes = (0..n_nodes).map(|_| bytes.get_u64_le()).collect();

        let n_tensors = bytes.get_u32_le() as usize;
        let tensors_len = n_tensors.checked_mul(WireTensor::SIZE).ok_or_else(short)?;
        if bytes.remaining() != tensors_len {
            return Err(RpcError::malformed(format!(
                "graph payload declares {} tensors ({} bytes) but carries {} bytes",
                n_tensors,
                tensors_len,
                bytes.remaining()
            )));
        }
        let tensors = (0..n_tensors).map(|_| WireTensor::get(&mut bytes)).collect();

        Ok(Self { nodes, tensors })
    }
}

/// A decoded request, one variant per [`Command`].
///
/// Variable-length payloads stay raw until the registry parses them, so a
/// malformed payload is an application failure rather than a framing error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    AllocBuffer(AllocBufferReq),
    GetAlignment,
    GetMaxSize,
    BufferGetBase(BufferGetBaseReq),
    FreeBuffer(FreeBufferReq),
    BufferClear(BufferClearReq),
    SetTensor(Vec<u8>),
    GetTensor(GetTensorReq),
    CopyTensor(CopyTensorReq),
    GraphCompute(Vec<u8>),
    GetDeviceMemory,
    InitTensor(InitTensorReq),
    GetAllocSize(GetAllocSizeReq),
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::AllocBuffer(_) => Command::AllocBuffer,
            Request::GetAlignment => Command::GetAlignment,
            Request::GetMaxSize => Command::GetMaxSize,
            Request::BufferGetBase(_) => Command::BufferGetBase,
            Request::FreeBuffer(_) => Command::FreeBuffer,
            Request::BufferClear(_) => Command::BufferClear,
            Request::SetTensor(_) => Command::SetTensor,
            Request::GetTensor(_) => Command::GetTensor,
            Request::CopyTensor(_) => Command::CopyTensor,
            Request::GraphCompute(_) => Command::GraphCompute,
            Request::GetDeviceMemory => Command::GetDeviceMemory,
            Request::InitTensor(_) => Command::InitTensor,
            Request::GetAllocSize(_) => Command::GetAllocSize,
        }
    }

    /// Encode the request body (without command byte or length prefix).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Request::AllocBuffer(r) => encode(r),
            Request::GetAlignment | Request::GetMaxSize | Request::GetDeviceMemory => Vec::new(),
            Request::BufferGetBase(r) => encode(r),
            Request::FreeBuffer(r) => encode(r),
            Request::BufferClear(r) => encode(r),
            Request::SetTensor(raw) | Request::GraphCompute(raw) => raw.clone(),
            Request::GetTensor(r) => encode(r),
            Request::CopyTensor(r) => encode(r),
            Request::InitTensor(r) => encode(r),
            Request::GetAllocSize(r) => encode(r),
        }
    }

    /// Decode a request body for `command`. Fixed-size bodies must match
    /// their packed size exactly.
    pub fn decode(command: Command, body: Vec<u8>) -> Result<Self> {
        if let Some(expected) = command.request_size() {
            if body.len() != expected {
                return Err(RpcError::SizeMismatch {
                    expected: expected as u64,
                    actual: body.len() as u64,
                });
            }
        }
        let request = match command {
            Command::AllocBuffer => Request::AllocBuffer(decode_exact(&body)?),
            Command::GetAlignment => Request::GetAlignment,
            Command::GetMaxSize => Request::GetMaxSize,
            Command::BufferGetBase => Request::BufferGetBase(decode_exact(&body)?),
            Command::FreeBuffer => Request::FreeBuffer(decode_exact(&body)?),
            Command::BufferClear => Request::BufferClear(decode_exact(&body)?),
            Command::SetTensor => Request::SetTensor(body),
            Command::GetTensor => Request::GetTensor(decode_exact(&body)?),
            Command::CopyTensor => Request::CopyTensor(decode_exact(&body)?),
            Command::GraphCompute => Request::GraphCompute(body),
            Command::GetDeviceMemory => Request::GetDeviceMemory,
            Command::InitTensor => Request::InitTensor(decode_exact(&body)?),
            Command::GetAllocSize => Request::GetAllocSize(decode_exact(&body)?),
        };
        Ok(request)
    }

    /// Length of the response shape this request expects (excluding status).
    pub fn response_len(&self) -> usize {
        match self {
            Request::GetTensor(r) => r.size as usize,
            other => other.command().response_size().unwrap_or(0),
        }
    }

    /// The zero-filled response sent when the handler fails.
    pub fn failure_response(&self) -> Response {
        match self {
            Request::AllocBuffer(_) => Response::AllocBuffer(AllocBufferRsp::default()),
            Request::GetAlignment => Response::GetAlignment(GetAlignmentRsp::default()),
            Request::GetMaxSize => Response::GetMaxSize(GetMaxSizeRsp::default()),
            Request::BufferGetBase(_) => Response::BufferGetBase(BufferGetBaseRsp::default()),
            Request::FreeBuffer(_) => Response::FreeBuffer,
            Request::BufferClear(_) => Response::BufferClear,
            Request::SetTensor(_) => Response::SetTensor,
            Request::GetTensor(r) => Response::GetTensor(vec![0; r.size as usize]),
            Request::CopyTensor(_) => Response::CopyTensor(CopyTensorRsp::default()),
            Request::GraphCompute(_) => Response::GraphCompute(GraphComputeRsp::default()),
            Request::GetDeviceMemory => Response::GetDeviceMemory(DeviceMemoryRsp::default()),
            Request::InitTensor(_) => Response::InitTensor,
            Request::GetAllocSize(_) => Response::GetAllocSize(GetAllocSizeRsp::default()),
        }
    }
}

/// A response shape, one variant per [`Command`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    AllocBuffer(AllocBufferRsp),
    GetAlignment(GetAlignmentRsp),
    GetMaxSize(GetMaxSizeRsp),
    BufferGetBase(BufferGetBaseRsp),
    FreeBuffer,
    BufferClear,
    SetTensor,
    GetTensor(Vec<u8>),
    CopyTensor(CopyTensorRsp),
    GraphCompute(GraphComputeRsp),
    GetDeviceMemory(DeviceMemoryRsp),
    InitTensor,
    GetAllocSize(GetAllocSizeRsp),
}

impl Response {
    pub fn command(&self) -> Command {
        match self {
            Response::AllocBuffer(_) => Command::AllocBuffer,
            Response::GetAlignment(_) => Command::GetAlignment,
            Response::GetMaxSize(_) => Command::GetMaxSize,
            Response::BufferGetBase(_) => Command::BufferGetBase,
            Response::FreeBuffer => Command::FreeBuffer,
            Response::BufferClear => Command::BufferClear,
            Response::SetTensor => Command::SetTensor,
            Response::GetTensor(_) => Command::GetTensor,
            Response::CopyTensor(_) => Command::CopyTensor,
            Response::GraphCompute(_) => Command::GraphCompute,
            Response::GetDeviceMemory(_) => Command::GetDeviceMemory,
            Response::InitTensor => Command::InitTensor,
            Response::GetAllocSize(_) => Command::GetAllocSize,
        }
    }

    fn put(&self, buf: &mut impl BufMut) {
        match self {
            Response::AllocBuffer(r) => r.put(buf),
            Response::GetAlignment(r) => r.put(buf),
            Response::GetMaxSize(r) => r.put(buf),
            Response::BufferGetBase(r) => r.put(buf),
            Response::FreeBuffer | Response::BufferClear | Response::SetTensor | Response::InitTensor => {}
            Response::GetTensor(data) => buf.put_slice(data),
            Response::CopyTensor(r) => r.put(buf),
            Response::GraphCompute(r) => r.put(buf),
            Response::GetDeviceMemory(r) => r.put(buf),
            Response::GetAllocSize(r) => r.put(buf),
        }
    }

    fn len(&self) -> usize {
        match self {
            Response::GetTensor(data) => data.len(),
            other => other.command().response_size().unwrap_or(0),
        }
    }

    /// Decode a response shape for `command`. Any length is accepted for
    /// get-tensor; every other shape must match its packed size.
    pub fn decode(command: Command, body: &[u8]) -> Result<Self> {
        let response = match command {
            Command::AllocBuffer => Response::AllocBuffer(decode_exact(body)?),
            Command::GetAlignment => Response::GetAlignment(decode_exact(body)?),
            Command::GetMaxSize => Response::GetMaxSize(decode_exact(body)?),
            Command::BufferGetBase => Response::BufferGetBase(decode_exact(body)?),
            Command::GetTensor => Response::GetTensor(body.to_vec()),
            Command::CopyTensor => Response::CopyTensor(decode_exact(body)?),
            Command::GraphCompute => Response::GraphCompute(decode_exact(body)?),
            Command::GetDeviceMemory => Response::GetDeviceMemory(decode_exact(body)?),
            Command::GetAllocSize => Response::GetAllocSize(decode_exact(body)?),
            Command::FreeBuffer | Command::BufferClear | Command::SetTensor | Command::InitTensor => {
                if !body.is_empty() {
                    return Err(RpcError::SizeMismatch {
                        expected: 0,
                        actual: body.len() as u64,
                    });
                }
                match command {
                    Command::FreeBuffer => Response::FreeBuffer,
                    Command::BufferClear => Response::BufferClear,
                    Command::SetTensor => Response::SetTensor,
                    _ => Response::InitTensor,
                }
            }
        };
        Ok(response)
    }
}

/// A response shape with its leading status byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub ok: bool,
    pub response: Response,
}

impl ResponseFrame {
    pub fn ok(response: Response) -> Self {
        Self { ok: true, response }
    }

    pub fn failed(response: Response) -> Self {
        Self {
            ok: false,
            response,
        }
    }

    /// Encoded length: status byte plus shape.
    pub fn encoded_len(&self) -> usize {
        1 + self.response.len()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.put_u8(u8::from(self.ok));
        self.response.put(&mut out);
        out
    }

    pub fn decode(command: Command, bytes: &[u8]) -> Result<Self> {
        let (status, body) = bytes
            .split_first()
            .ok_or_else(|| RpcError::malformed("empty response"))?;
        let ok = match status {
            0 => false,
            1 => true,
            other => {
                return Err(RpcError::malformed(format!("invalid status byte {}", other)));
            }
        };
        Ok(Self {
            ok,
            response: Response::decode(command, body)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{ElementType, TensorOp};

    fn sample_tensor(id: u64) -> WireTensor {
        WireTensor::new(id, ElementType::F32, [16, 4, 1, 1])
            .with_storage(0x10, 0x7f00_0000_1000)
            .with_op(TensorOp::Mul, &[id + 1, id + 2])
            .with_name("t")
    }

    fn sample_requests() -> Vec<Request> {
        vec![
            Request::AllocBuffer(AllocBufferReq { size: 1024 }),
            Request::GetAlignment,
            Request::GetMaxSize,
            Request::BufferGetBase(BufferGetBaseReq { remote_ptr: 9 }),
            Request::FreeBuffer(FreeBufferReq { remote_ptr: 9 }),
            Request::BufferClear(BufferClearReq {
                remote_ptr: 9,
                value: 0xAB,
            }),
            Request::SetTensor(
                SetTensorReq {
                    tensor: sample_tensor(1),
                    offset: 8,
                    data: vec![1, 2, 3],
                }
                .encode(),
            ),
            Request::GetTensor(GetTensorReq {
                tensor: sample_tensor(2),
                offset: 4,
                size: 64,
            }),
            Request::CopyTensor(CopyTensorReq {
                src: sample_tensor(3),
                dst: sample_tensor(4),
            }),
            Request::GraphCompute(
                GraphComputeReq {
                    nodes: vec![5],
                    tensors: vec![sample_tensor(5)],
                }
                .encode(),
            ),
            Request::GetDeviceMemory,
            Request::InitTensor(InitTensorReq {
                tensor: sample_tensor(6),
            }),
            Request::GetAllocSize(GetAllocSizeReq {
                tensor: sample_tensor(7),
            }),
        ]
    }

    #[test]
    fn test_every_command_request_roundtrip() {
        let requests = sample_requests();
        assert_eq!(requests.len(), Command::COUNT as usize);

        for request in requests {
            let command = request.command();
            let body = request.encode();
            if let Some(size) = command.request_size() {
                assert_eq!(body.len(), size, "{} body size", command);
            }
            let decoded = Request::decode(command, body).unwrap();
            assert_eq!(decoded, request);
        }
    }

    #[test]
    fn test_fixed_request_with_wrong_size_rejected() {
        let err = Request::decode(Command::AllocBuffer, vec![0; 7]).unwrap_err();
        assert!(matches!(
            err,
            RpcError::SizeMismatch {
                expected: 8,
                actual: 7
            }
        ));

        let err = Request::decode(Command::GetAlignment, vec![0]).unwrap_err();
        assert!(matches!(err, RpcError::SizeMismatch { expected: 0, .. }));
    }

    #[test]
    fn test_record_sizes_match_packed_layout() {
        assert_eq!(AllocBufferRsp::SIZE, 16);
        assert_eq!(DeviceMemoryRsp::SIZE, 16);
        assert_eq!(BufferClearReq::SIZE, 9);
        assert_eq!(GetTensorReq::SIZE, 312);
        assert_eq!(CopyTensorReq::SIZE, 592);
    }

    #[test]
    fn test_set_tensor_payload_roundtrip() {
        let req = SetTensorReq {
            tensor: sample_tensor(1),
            offset: 128,
            data: (0..64).collect(),
        };
        assert_eq!(SetTensorReq::decode(&req.encode()).unwrap(), req);
    }

    #[test]
    fn test_set_tensor_short_payload_rejected() {
        let bytes = vec![0u8; WireTensor::SIZE];
        assert!(matches!(
            SetTensorReq::decode(&bytes),
            Err(RpcError::Malformed { .. })
        ));
    }

    #[test]
    fn test_graph_payload_roundtrip() {
        let req = GraphComputeReq {
            nodes: vec![3, 2],
            tensors: vec![sample_tensor(1), sample_tensor(2), sample_tensor(3)],
        };
        let bytes = req.encode();
        assert_eq!(bytes.len(), req.encoded_len());
        assert_eq!(GraphComputeReq::decode(&bytes).unwrap(), req);
    }

    #[test]
    fn test_graph_payload_with_bad_counts_rejected() {
        let req = GraphComputeReq {
            nodes: vec![1],
            tensors: vec![sample_tensor(1)],
        };
        let mut bytes = req.encode();

        // Trailing garbage
        bytes.push(0);
        assert!(GraphComputeReq::decode(&bytes).is_err());

        // Node count larger than the payload
        let mut bytes = req.encode();
        bytes[0..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(GraphComputeReq::decode(&bytes).is_err());

        // Empty
        assert!(GraphComputeReq::decode(&[]).is_err());
    }

    #[test]
    fn test_failure_frame_has_same_length_as_success() {
        for request in sample_requests() {
            let failed = ResponseFrame::failed(request.failure_response());
            assert_eq!(failed.encoded_len(), 1 + request.response_len());
            assert_eq!(failed.encode().len(), failed.encoded_len());
        }
    }

    #[test]
    fn test_response_frame_roundtrip() {
        let frame = ResponseFrame::ok(Response::AllocBuffer(AllocBufferRsp {
            remote_ptr: 1,
            remote_size: 1024,
        }));
        let decoded = ResponseFrame::decode(Command::AllocBuffer, &frame.encode()).unwrap();
        assert_eq!(decoded, frame);

        let frame = ResponseFrame::failed(Response::GetTensor(vec![0; 8]));
        let decoded = ResponseFrame::decode(Command::GetTensor, &frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_response_frame_rejects_bad_status() {
        assert!(ResponseFrame::decode(Command::FreeBuffer, &[2]).is_err());
        assert!(ResponseFrame::decode(Command::FreeBuffer, &[]).is_err());
        assert!(ResponseFrame::decode(Command::FreeBuffer, &[1, 0]).is_err());
    }
}
