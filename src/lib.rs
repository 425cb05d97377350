//! ptyd - pseudoterminal bridge
//!
//! Runs a program on a freshly allocated pseudoterminal and bridges it to a
//! controller over standard input/output. Output from the program is
//! relayed verbatim; input is a small framed protocol:
//!
//! - `protocol`: frame buffer, frame encoding and the incremental decoder
//! - `pty`: PTY allocation and spawning the child on it
//! - `process`: signals, resizes and exit-status collection for the child
//! - `session`: the readiness-driven loop tying it all together
//! - `config`: runtime knobs with their defaults

pub mod config;
pub mod process;
pub mod protocol;
pub mod pty;
pub mod session;

pub use config::SessionConfig;
pub use process::{ExitOutcome, ProcessController};
pub use protocol::Frame;
pub use session::Session;
