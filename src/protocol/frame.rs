//! Control protocol frames
//!
//! Every frame starts with a one-byte opcode. Integers are big-endian.
//!
//! | Opcode | Layout                               |
//! |--------|--------------------------------------|
//! | `0x01` | opcode, u32 length `n`, `n` bytes    |
//! | `0x02` | opcode, u16 columns, u16 rows        |
//! | `0x03` | opcode                               |

use super::ProtocolError;

/// Data frame opcode
pub const OPCODE_DATA: u8 = 0x01;
/// Resize frame opcode
pub const OPCODE_RESIZE: u8 = 0x02;
/// Close frame opcode
pub const OPCODE_CLOSE: u8 = 0x03;

/// Size of the Data header (opcode + u32 length)
pub const DATA_HEADER_LEN: usize = 5;
/// Size of a Resize frame (opcode + two u16)
pub const RESIZE_FRAME_LEN: usize = 5;

/// A decoded controller request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Bytes to write verbatim to the pseudoterminal
    Data(Vec<u8>),
    /// New terminal dimensions
    Resize { columns: u16, rows: u16 },
    /// Ask the child to hang up
    Close,
}

impl Frame {
    /// Build a Data frame from any byte slice
    pub fn data(payload: impl AsRef<[u8]>) -> Self {
        Frame::Data(payload.as_ref().to_vec())
    }

    /// Opcode this frame is encoded with
    pub fn opcode(&self) -> u8 {
        match self {
            Frame::Data(_) => OPCODE_DATA,
            Frame::Resize { .. } => OPCODE_RESIZE,
            Frame::Close => OPCODE_CLOSE,
        }
    }

    /// Number of bytes this frame occupies on the wire
    pub fn encoded_len(&self) -> usize {
        match self {
            Frame::Data(payload) => DATA_HEADER_LEN + payload.len(),
            Frame::Resize { .. } => RESIZE_FRAME_LEN,
            Frame::Close => 1,
        }
    }

    /// Append the wire form of this frame to `out`
    pub fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), ProtocolError> {
        match self {
            Frame::Data(payload) => {
                let len = u32::try_from(payload.len())
                    .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
                out.reserve(DATA_HEADER_LEN + payload.len());
                out.push(self.opcode());
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(payload);
            },
            Frame::Resize { columns, rows } => {
                out.push(self.opcode());
                out.extend_from_slice(&columns.to_be_bytes());
                out.extend_from_slice(&rows.to_be_bytes());
            },
            Frame::Close => out.push(self.opcode()),
        }
        Ok(())
    }

    /// Encode this frame into a fresh vector
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut out = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut out)?;
        Ok(out)
    }
}
