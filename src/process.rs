//! Process controller
//!
//! Owns the PTY master and the child it was spawned with, and turns
//! controller requests into OS effects: input writes, window-size changes,
//! signal delivery and exit-status collection.
//!
//! Signal delivery comes in two flavours. [`ProcessController::deliver`]
//! propagates failures to the caller; [`ProcessController::notify`] only
//! logs them. Protocol handling uses `notify`, because by the time a
//! signal is sent the frame that asked for it has already been consumed.

use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{getpgid, Pid};

use crate::pty::{Pty, PtyError, WindowSize};

/// Error type for process control
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("Failed to resolve process group of {pid}: {source}")]
    ProcessGroup {
        pid: Pid,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to deliver {signal} to {target:?}: {source}")]
    Signal {
        signal: Signal,
        target: SignalTarget,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] nix::Error),
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Normal exit with a status value
    Exited(i32),
    /// Killed by an uncaught signal
    Signaled(Signal),
    /// Anything else waitpid reported
    Other,
}

impl ExitOutcome {
    /// Interpret a wait status. `None` means the child is still running.
    pub fn from_wait_status(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::StillAlive => None,
            WaitStatus::Exited(_, code) => Some(ExitOutcome::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Some(ExitOutcome::Signaled(signal)),
            _ => Some(ExitOutcome::Other),
        }
    }

    /// Exit code the bridge reports for this outcome: the exit status for a
    /// normal exit, `128 + signal` for a signal death, `1` otherwise
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitOutcome::Exited(code) => *code,
            ExitOutcome::Signaled(signal) => 128 + *signal as i32,
            ExitOutcome::Other => 1,
        }
    }
}

/// Where a signal for the child goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    /// The child leads its process group; signal the whole group
    Group(Pid),
    /// Signal the child alone
    Process(Pid),
}

impl SignalTarget {
    fn send(self, signal: Signal) -> nix::Result<()> {
        match self {
            SignalTarget::Group(pgid) => killpg(pgid, signal),
            SignalTarget::Process(pid) => kill(pid, signal),
        }
    }
}

/// Decide where a signal for `pid` should go.
///
/// Group membership can change at any time, so this is looked up on every
/// delivery and never cached.
pub fn resolve_target(pid: Pid) -> Result<SignalTarget, ProcessError> {
    let pgid = getpgid(Some(pid)).map_err(|source| ProcessError::ProcessGroup { pid, source })?;
    if pgid == pid {
        Ok(SignalTarget::Group(pgid))
    } else {
        Ok(SignalTarget::Process(pid))
    }
}

/// Control handle over the child and its PTY
pub struct ProcessController {
    pty: Pty,
    /// Set once the child has been reaped
    outcome: Option<ExitOutcome>,
}

impl ProcessController {
    pub fn new(pty: Pty) -> Self {
        Self { pty, outcome: None }
    }

    /// The PTY this controller drives
    pub fn pty(&self) -> &Pty {
        &self.pty
    }

    pub fn child_pid(&self) -> Pid {
        self.pty.child_pid()
    }

    /// Write controller input to the PTY
    pub fn write_input(&self, bytes: &[u8]) -> Result<(), ProcessError> {
        self.pty.write_all(bytes)?;
        Ok(())
    }

    /// Apply a new window size, then tell the child about it.
    ///
    /// Only the resize itself can fail; SIGWINCH is best-effort.
    pub fn apply_resize(&self, columns: u16, rows: u16) -> Result<(), ProcessError> {
        self.pty.resize(WindowSize::new(columns, rows))?;
        tracing::debug!(columns, rows, "resized pty");
        self.notify(Signal::SIGWINCH);
        Ok(())
    }

    /// Ask the child to hang up (best-effort)
    pub fn signal_hangup(&self) {
        self.notify(Signal::SIGHUP);
    }

    /// Deliver a signal to the child, propagating any failure
    pub fn deliver(&self, signal: Signal) -> Result<(), ProcessError> {
        let target = resolve_target(self.child_pid())?;
        target
            .send(signal)
            .map_err(|source| ProcessError::Signal {
                signal,
                target,
                source,
            })?;
        tracing::debug!(%signal, ?target, "delivered signal");
        Ok(())
    }

    /// Deliver a signal to the child, logging any failure.
    ///
    /// Returns whether the signal was delivered.
    pub fn notify(&self, signal: Signal) -> bool {
        match self.deliver(signal) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("{}", e);
                false
            },
        }
    }

    /// Check for child termination without blocking
    pub fn poll_exit(&mut self) -> Result<Option<ExitOutcome>, ProcessError> {
        if self.outcome.is_some() {
            return Ok(self.outcome);
        }

        let status =
            waitpid(self.child_pid(), Some(WaitPidFlag::WNOHANG)).map_err(ProcessError::Wait)?;
        self.outcome = ExitOutcome::from_wait_status(status);
        Ok(self.outcome)
    }

    /// Block until the child terminates
    pub fn wait_exit(&mut self) -> Result<ExitOutcome, ProcessError> {
        if let Some(outcome) = self.outcome {
            return Ok(outcome);
        }

        loop {
            match waitpid(self.child_pid(), None) {
                Ok(status) => {
                    if let Some(outcome) = ExitOutcome::from_wait_status(status) {
                        self.outcome = Some(outcome);
                        return Ok(outcome);
                    }
                },
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(ProcessError::Wait(e)),
            }
        }
    }
}
