//! Frame decoder
//!
//! Pulls complete frames off the front of a [`FrameBuffer`]. The decoder
//! keeps no state of its own: a frame that is only partly buffered is left
//! in place untouched until the rest of it arrives.
//!
//! Unknown opcodes are skipped one byte at a time. There is no resync
//! marker, so a corrupted Data length can swallow the rest of the stream.

use super::buffer::FrameBuffer;
use super::frame::{
    Frame, DATA_HEADER_LEN, OPCODE_CLOSE, OPCODE_DATA, OPCODE_RESIZE, RESIZE_FRAME_LEN,
};

/// Outcome of looking at the front of the buffer
#[derive(Debug, PartialEq, Eq)]
enum Peek {
    /// A complete frame and the number of bytes it occupies
    Frame(Frame, usize),
    /// Unrecognized opcode; one byte to drop
    Noise(u8),
    /// Not enough bytes yet (or nothing at all)
    Incomplete,
}

fn peek(bytes: &[u8]) -> Peek {
    let Some(&opcode) = bytes.first() else {
        return Peek::Incomplete;
    };

    match opcode {
        OPCODE_DATA => {
            if bytes.len() < DATA_HEADER_LEN {
                return Peek::Incomplete;
            }
            let n = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
            let Some(total) = DATA_HEADER_LEN.checked_add(n) else {
                return Peek::Incomplete;
            };
            if bytes.len() < total {
                return Peek::Incomplete;
            }
            Peek::Frame(Frame::Data(bytes[DATA_HEADER_LEN..total].to_vec()), total)
        },
        OPCODE_RESIZE => {
            if bytes.len() < RESIZE_FRAME_LEN {
                return Peek::Incomplete;
            }
            let columns = u16::from_be_bytes([bytes[1], bytes[2]]);
            let rows = u16::from_be_bytes([bytes[3], bytes[4]]);
            Peek::Frame(Frame::Resize { columns, rows }, RESIZE_FRAME_LEN)
        },
        OPCODE_CLOSE => Peek::Frame(Frame::Close, 1),
        other => Peek::Noise(other),
    }
}

/// Remove and return the next complete frame.
///
/// Noise bytes in front of the frame are consumed along the way. Returns
/// `None` when the buffer is empty or holds only part of a frame.
pub fn next_frame(buf: &mut FrameBuffer) -> Option<Frame> {
    loop {
        match peek(buf.as_slice()) {
            Peek::Frame(frame, len) => {
                buf.consume(len);
                return Some(frame);
            },
            Peek::Noise(opcode) => {
                tracing::trace!(opcode, "skipping unrecognized opcode");
                buf.consume(1);
            },
            Peek::Incomplete => return None,
        }
    }
}

/// Decode every complete frame currently buffered
pub fn decode_all(buf: &mut FrameBuffer) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Some(frame) = next_frame(buf) {
        frames.push(frame);
    }
    frames
}
