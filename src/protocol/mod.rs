//! Controller input protocol
//!
//! The controller drives the session by writing frames to our standard
//! input. This module holds the pending-byte buffer, the frame type with
//! its wire encoding, and the decoder that turns one into the other.

pub mod buffer;
pub mod decoder;
pub mod frame;

pub use buffer::FrameBuffer;
pub use decoder::{decode_all, next_frame};
pub use frame::Frame;

/// Error type for protocol buffering and encoding
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Out of memory growing frame buffer to {requested} bytes")]
    OutOfMemory { requested: usize },

    #[error("Data payload of {0} bytes does not fit a u32 length")]
    PayloadTooLarge(usize),
}
