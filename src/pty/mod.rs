//! PTY (Pseudoterminal) handling
//!
//! This module allocates a pseudoterminal, spawns the target program on
//! its slave side as a session leader, and exposes the master side for
//! reading, writing and resizing.

#[cfg(unix)]
mod unix;

#[cfg(unix)]
pub use unix::{Pty, EXEC_FAILURE_STATUS};

use nix::libc;

/// Error type for PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Failed to open PTY master: {0}")]
    OpenMaster(#[source] nix::Error),

    #[error("Failed to grant PTY access: {0}")]
    GrantPty(#[source] nix::Error),

    #[error("Failed to unlock PTY: {0}")]
    UnlockPty(#[source] nix::Error),

    #[error("Failed to get PTY slave name: {0}")]
    PtsName(#[source] nix::Error),

    #[error("Failed to open PTY slave: {0}")]
    OpenSlave(#[source] nix::Error),

    #[error("Failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("Failed to set window size: {0}")]
    SetWinsize(#[source] nix::Error),

    #[error("Failed to get window size: {0}")]
    GetWinsize(#[source] nix::Error),

    #[error("Failed to read from PTY: {0}")]
    Read(#[source] nix::Error),

    #[error("Failed to write to PTY: {0}")]
    Write(#[source] nix::Error),

    #[error("Failed to poll PTY: {0}")]
    Poll(#[source] nix::Error),

    #[error("Argument contains an interior NUL byte: {0:?}")]
    NulInArgument(String),
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

/// Window size for PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    pub pixel_width: u16,
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size with just rows and columns
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<WindowSize> for libc::winsize {
    fn from(ws: WindowSize) -> Self {
        libc::winsize {
            ws_row: ws.rows,
            ws_col: ws.cols,
            ws_xpixel: ws.pixel_width,
            ws_ypixel: ws.pixel_height,
        }
    }
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_new() {
        let size = WindowSize::new(120, 40);
        assert_eq!(size.cols, 120);
        assert_eq!(size.rows, 40);
        assert_eq!(size.pixel_width, 0);
    }

    #[test]
    fn test_window_size_default() {
        assert_eq!(WindowSize::default(), WindowSize::new(80, 24));
    }

    #[test]
    fn test_winsize_conversion() {
        let ws: libc::winsize = WindowSize::new(100, 30).into();
        assert_eq!(ws.ws_col, 100);
        assert_eq!(ws.ws_row, 30);
        assert_eq!(WindowSize::from(ws), WindowSize::new(100, 30));
    }
}
