//! Wire protocol shared by client and server.
//!
//! Every request is a one-byte [`Command`] followed by a length-prefixed body;
//! every response is a length-prefixed body that starts with a status byte.
//! All integers are little-endian and every record is packed.
//!
//! ```text
//! request:  [u8 cmd][u64 LE len][body of len]
//! response: [u64 LE len][u8 status][shape of len - 1]
//! ```

pub mod frame;
pub mod message;
pub mod tensor;

pub use message::{
    AllocBufferReq, AllocBufferRsp, BufferClearReq, BufferGetBaseReq, BufferGetBaseRsp,
    CopyTensorReq, CopyTensorRsp, DeviceMemoryRsp, FreeBufferReq, GetAlignmentRsp,
    GetAllocSizeReq, GetAllocSizeRsp, GetMaxSizeRsp, GetTensorReq, GraphComputeReq,
    GraphComputeRsp, InitTensorReq, Request, Response, ResponseFrame, SetTensorReq,
};
pub use tensor::WireTensor;

use crate::RpcError;

/// Maximum tensor rank.
pub const MAX_DIMS: usize = 4;
/// Size of the operation parameter block in bytes.
pub const MAX_OP_PARAMS: usize = 64;
/// Number of `i32` slots in the operation parameter block.
pub const OP_PARAMS_LEN: usize = MAX_OP_PARAMS / std::mem::size_of::<i32>();
/// Maximum number of source tensors per node.
pub const MAX_SRC: usize = 10;
/// Length of the fixed name field.
pub const MAX_NAME: usize = 64;

/// Request opcodes. The discriminants are the wire values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    AllocBuffer = 0,
    GetAlignment = 1,
    GetMaxSize = 2,
    BufferGetBase = 3,
    FreeBuffer = 4,
    BufferClear = 5,
    SetTensor = 6,
    GetTensor = 7,
    CopyTensor = 8,
    GraphCompute = 9,
    GetDeviceMemory = 10,
    InitTensor = 11,
    GetAllocSize = 12,
}

impl Command {
    /// Number of valid opcodes; any byte at or above this is invalid.
    pub const COUNT: u8 = 13;

    pub const ALL: [Command; Command::COUNT as usize] = [
        Command::AllocBuffer,
        Command::GetAlignment,
        Command::GetMaxSize,
        Command::BufferGetBase,
        Command::FreeBuffer,
        Command::BufferClear,
        Command::SetTensor,
        Command::GetTensor,
        Command::CopyTensor,
        Command::GraphCompute,
        Command::GetDeviceMemory,
        Command::InitTensor,
        Command::GetAllocSize,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Command::AllocBuffer => "alloc_buffer",
            Command::GetAlignment => "get_alignment",
            Command::GetMaxSize => "get_max_size",
            Command::BufferGetBase => "buffer_get_base",
            Command::FreeBuffer => "free_buffer",
            Command::BufferClear => "buffer_clear",
            Command::SetTensor => "set_tensor",
            Command::GetTensor => "get_tensor",
            Command::CopyTensor => "copy_tensor",
            Command::GraphCompute => "graph_compute",
            Command::GetDeviceMemory => "get_device_memory",
            Command::InitTensor => "init_tensor",
            Command::GetAllocSize => "get_alloc_size",
        }
    }

    /// Packed size of the request body, or `None` for variable-length bodies.
    pub fn request_size(self) -> Option<usize> {
        match self {
            Command::AllocBuffer => Some(AllocBufferReq::SIZE),
            Command::GetAlignment | Command::GetMaxSize | Command::GetDeviceMemory => Some(0),
            Command::BufferGetBase => Some(BufferGetBaseReq::SIZE),
            Command::FreeBuffer => Some(FreeBufferReq::SIZE),
            Command::BufferClear => Some(BufferClearReq::SIZE),
            Command::SetTensor | Command::GraphCompute => None,
            Command::GetTensor => Some(GetTensorReq::SIZE),
            Command::CopyTensor => Some(CopyTensorReq::SIZE),
            Command::InitTensor => Some(InitTensorReq::SIZE),
            Command::GetAllocSize => Some(GetAllocSizeReq::SIZE),
        }
    }

    /// Packed size of the response shape (excluding the status byte), or
    /// `None` when it depends on the request.
    pub fn response_size(self) -> Option<usize> {
        match self {
            Command::AllocBuffer => Some(AllocBufferRsp::SIZE),
            Command::GetAlignment => Some(GetAlignmentRsp::SIZE),
            Command::GetMaxSize => Some(GetMaxSizeRsp::SIZE),
            Command::BufferGetBase => Some(BufferGetBaseRsp::SIZE),
            Command::FreeBuffer
            | Command::BufferClear
            | Command::SetTensor
            | Command::InitTensor => Some(0),
            Command::GetTensor => None,
            Command::CopyTensor => Some(CopyTensorRsp::SIZE),
            Command::GraphCompute => Some(GraphComputeRsp::SIZE),
            Command::GetDeviceMemory => Some(DeviceMemoryRsp::SIZE),
            Command::GetAllocSize => Some(GetAllocSizeRsp::SIZE),
        }
    }
}

impl TryFrom<u8> for Command {
    type Error = RpcError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Command::ALL
            .get(value as usize)
            .copied()
            .ok_or(RpcError::InvalidCommand(value))
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_byte_roundtrip() {
        for (i, cmd) in Command::ALL.iter().enumerate() {
            assert_eq!(cmd.as_u8() as usize, i);
            assert_eq!(Command::try_from(cmd.as_u8()).unwrap(), *cmd);
        }
    }

    #[test]
    fn test_out_of_range_command_rejected() {
        for byte in [Command::COUNT, 42, 255] {
            match Command::try_from(byte) {
                Err(RpcError::InvalidCommand(b)) => assert_eq!(b, byte),
                other => panic!("Expected InvalidCommand, got: {:?}", other),
            }
        }
    }

    #[test]
    fn test_variable_commands() {
        let variable: Vec<_> = Command::ALL
            .iter()
            .filter(|c| c.request_size().is_none())
            .collect();
        assert_eq!(variable, vec![&Command::SetTensor, &Command::GraphCompute]);
        assert_eq!(Command::GetTensor.response_size(), None);
    }
}
