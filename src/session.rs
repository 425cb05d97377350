//! Session loop
//!
//! Drives one bridged child from spawn to exit. Each step combines two
//! independent signals:
//!
//! - a liveness check on the child ([`ProcessController::poll_exit`]),
//! - an I/O readiness wait on the controller input and the PTY master,
//!   bounded by the configured poll interval.
//!
//! Controller input is buffered and decoded into frames whose effects are
//! applied in order. PTY output is copied verbatim to the controller
//! output. The session ends when the PTY reaches end-of-stream or the
//! child is seen to have exited, whichever comes first.

use std::io::{self, Write};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd};

use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::unistd::read;

use crate::config::SessionConfig;
use crate::process::{ExitOutcome, ProcessController, ProcessError};
use crate::protocol::{decoder, Frame, FrameBuffer, ProtocolError};
use crate::pty::PtyError;

/// Exit code for any fatal failure inside the bridge itself
pub const FAILURE_EXIT_CODE: i32 = 1;

/// Error type for the session loop
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("Failed to wait for readiness: {0}")]
    Poll(#[source] nix::Error),

    #[error("Failed to write controller output: {0}")]
    Output(#[source] io::Error),
}

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Controller input still open
    Running,
    /// Controller input reached end-of-stream; output relay continues
    Draining,
    /// PTY output reached end-of-stream; collecting the child's status
    Terminating,
    /// Finished with this exit code
    Exited(i32),
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Exit(i32),
}

/// Which streams a readiness wait reported
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub controller: bool,
    pub pty: bool,
}

/// A running bridge between a controller and a child on a PTY
pub struct Session<'a, W: Write> {
    controller: ProcessController,
    input: BorrowedFd<'a>,
    output: W,
    input_open: bool,
    buffer: FrameBuffer,
    /// Transient read chunk shared by both directions
    chunk: Vec<u8>,
    poll_timeout_ms: i32,
    state: SessionState,
}

impl<'a, W: Write> Session<'a, W> {
    /// Set up a session reading frames from `input` and relaying PTY
    /// output to `output`
    pub fn new(
        controller: ProcessController,
        input: BorrowedFd<'a>,
        output: W,
        config: &SessionConfig,
    ) -> Result<Self, SessionError> {
        Ok(Self {
            controller,
            input,
            output,
            input_open: true,
            buffer: FrameBuffer::with_capacity(config.initial_capacity)?,
            chunk: vec![0u8; config.read_chunk.max(1)],
            poll_timeout_ms: config.poll_timeout_ms(),
            state: SessionState::Running,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Run until the child is gone and return the bridge's exit code.
    ///
    /// The PTY master and frame buffer are released when this returns.
    pub fn run(mut self) -> i32 {
        tracing::debug!(pid = self.controller.child_pid().as_raw(), "session started");
        loop {
            match self.step() {
                Ok(Step::Continue) => {},
                Ok(Step::Exit(code)) => {
                    self.state = SessionState::Exited(code);
                    tracing::info!(code, "session finished");
                    return code;
                },
                Err(e) => {
                    tracing::error!("Session failed: {}", e);
                    self.state = SessionState::Exited(FAILURE_EXIT_CODE);
                    return FAILURE_EXIT_CODE;
                },
            }
        }
    }

    /// Run a single iteration of the loop
    pub fn step(&mut self) -> Result<Step, SessionError> {
        if let Some(outcome) = self.check_liveness() {
            tracing::debug!(?outcome, "child exited before pty end-of-stream");
            self.drain_output();
            return Ok(Step::Exit(outcome.exit_code()));
        }

        let ready = self.wait_readiness()?;

        if ready.controller {
            self.service_controller()?;
        }

        if ready.pty {
            if let Some(code) = self.service_pty()? {
                return Ok(Step::Exit(code));
            }
        }

        Ok(Step::Continue)
    }

    fn check_liveness(&mut self) -> Option<ExitOutcome> {
        match self.controller.poll_exit() {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!("Liveness check failed: {}", e);
                None
            },
        }
    }

    /// Wait until the PTY or (while open) the controller input is readable
    fn wait_readiness(&self) -> Result<Readiness, SessionError> {
        let pty = self.controller.pty().as_fd();
        let mut fds = Vec::with_capacity(2);
        fds.push(PollFd::new(&pty, PollFlags::POLLIN));
        if self.input_open {
            fds.push(PollFd::new(&self.input, PollFlags::POLLIN));
        }

        match poll(&mut fds, self.poll_timeout_ms) {
            Ok(0) => Ok(Readiness::default()),
            Ok(_) => Ok(Readiness {
                pty: is_readable(&fds[0]),
                controller: fds.get(1).is_some_and(is_readable),
            }),
            // Retried by the next iteration
            Err(Errno::EINTR) => Ok(Readiness::default()),
            Err(e) => Err(SessionError::Poll(e)),
        }
    }

    fn service_controller(&mut self) -> Result<(), SessionError> {
        match read(self.input.as_raw_fd(), &mut self.chunk) {
            Ok(0) => self.close_input(None),
            Ok(n) => {
                self.buffer.append(&self.chunk[..n])?;
                while let Some(frame) = decoder::next_frame(&mut self.buffer) {
                    self.apply(frame)?;
                }
            },
            Err(Errno::EINTR) | Err(Errno::EAGAIN) => {},
            Err(e) => self.close_input(Some(e)),
        }
        Ok(())
    }

    fn close_input(&mut self, error: Option<Errno>) {
        match error {
            Some(e) => tracing::warn!("Controller input failed, closing it: {}", e),
            None => tracing::debug!("controller input reached end-of-stream"),
        }
        self.input_open = false;
        if self.state == SessionState::Running {
            self.state = SessionState::Draining;
        }
    }

    /// Apply one decoded frame
    fn apply(&mut self, frame: Frame) -> Result<(), SessionError> {
        match frame {
            Frame::Data(payload) => self.controller.write_input(&payload)?,
            Frame::Resize { columns, rows } => self.controller.apply_resize(columns, rows)?,
            Frame::Close => {
                tracing::debug!("close requested");
                self.controller.signal_hangup();
            },
        }
        Ok(())
    }

    /// Read PTY output. Returns the exit code once the PTY is exhausted.
    fn service_pty(&mut self) -> Result<Option<i32>, SessionError> {
        let n = self.controller.pty().read(&mut self.chunk)?;
        if n == 0 {
            tracing::debug!("pty reached end-of-stream");
            self.state = SessionState::Terminating;
            let outcome = self.controller.wait_exit()?;
            return Ok(Some(outcome.exit_code()));
        }

        self.relay(n)?;
        Ok(None)
    }

    fn relay(&mut self, n: usize) -> Result<(), SessionError> {
        self.output
            .write_all(&self.chunk[..n])
            .and_then(|()| self.output.flush())
            .map_err(SessionError::Output)
    }

    /// Relay whatever the PTY still holds without blocking, up to one
    /// read chunk's worth of bytes. A descendant that survives the child
    /// can keep the terminal busy forever, so the drain stops at that
    /// budget. The child's status is already known, so failures here are
    /// only logged.
    fn drain_output(&mut self) {
        let budget = self.chunk.len();
        let mut relayed = 0usize;
        while relayed < budget {
            match self.controller.pty().poll_read(0) {
                Ok(true) => {},
                Ok(false) => return,
                Err(e) => {
                    tracing::warn!("Drain poll failed: {}", e);
                    return;
                },
            }

            match self.controller.pty().read(&mut self.chunk) {
                Ok(0) => return,
                Ok(n) => {
                    if let Err(e) = self.relay(n) {
                        tracing::warn!("Drain relay failed: {}", e);
                        return;
                    }
                    relayed += n;
                },
                Err(e) => {
                    tracing::warn!("Drain read failed: {}", e);
                    return;
                },
            }
        }
        tracing::debug!(relayed, "drain budget exhausted, pty still has output");
    }
}

fn is_readable(fd: &PollFd<'_>) -> bool {
    let wanted = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR | PollFlags::POLLNVAL;
    fd.revents().is_some_and(|r| r.intersects(wanted))
}
