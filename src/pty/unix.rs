//! Unix PTY implementation
//!
//! Implements PTY creation and child process spawning using POSIX APIs.

use std::ffi::{CString, OsStr};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::libc::{self, STDERR_FILENO, STDIN_FILENO, STDOUT_FILENO};
use nix::poll::{poll, PollFd, PollFlags};
use nix::pty::{grantpt, posix_openpt, ptsname, unlockpt, PtyMaster};
use nix::sys::signal::{self, SigHandler, Signal};
use nix::sys::stat::Mode;
use nix::unistd::{close, dup2, execvp, fork, read, setsid, write, ForkResult, Pid};

use super::{PtyError, PtyResult, WindowSize};

/// Exit status of a child whose program could not be executed
pub const EXEC_FAILURE_STATUS: i32 = 127;

/// Signals whose disposition is put back to default before `exec`.
/// The Rust runtime ignores SIGPIPE, and ignored dispositions survive exec.
const RESET_SIGNALS: [Signal; 7] = [
    Signal::SIGPIPE,
    Signal::SIGCHLD,
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGTERM,
    Signal::SIGWINCH,
];

/// A pseudoterminal master with a spawned child process
pub struct Pty {
    /// The PTY master file descriptor
    master: PtyMaster,
    /// The child process ID
    child_pid: Pid,
}

impl Pty {
    /// Spawn `program` with `args` on a fresh PTY of the given size.
    ///
    /// The child becomes a session leader with the slave side as its
    /// controlling terminal and as its stdin, stdout and stderr. `program`
    /// is looked up on `PATH`. If it cannot be executed the child exits
    /// with [`EXEC_FAILURE_STATUS`].
    pub fn spawn<S: AsRef<OsStr>>(program: &OsStr, args: &[S], size: WindowSize) -> PtyResult<Self> {
        // Everything the child needs is allocated before forking
        let mut argv: Vec<CString> = Vec::with_capacity(args.len() + 1);
        argv.push(to_cstring(program)?);
        for arg in args {
            argv.push(to_cstring(arg.as_ref())?);
        }

        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY).map_err(PtyError::OpenMaster)?;
        grantpt(&master).map_err(PtyError::GrantPty)?;
        unlockpt(&master).map_err(PtyError::UnlockPty)?;

        // SAFETY: ptsname is not thread-safe, but the result is copied into
        // an owned String before anything else can call it
        let slave_name = unsafe { ptsname(&master) }.map_err(PtyError::PtsName)?;

        set_window_size(master.as_raw_fd(), size)?;

        let slave_fd = open(slave_name.as_str(), OFlag::O_RDWR | OFlag::O_NOCTTY, Mode::empty())
            .map_err(PtyError::OpenSlave)?;
        // SAFETY: open just returned this descriptor and nothing else owns it
        let slave = unsafe { OwnedFd::from_raw_fd(slave_fd) };

        // SAFETY: the child only calls exec_child, which sticks to
        // async-signal-safe calls and never returns
        match unsafe { fork() }.map_err(PtyError::Fork)? {
            ForkResult::Child => exec_child(master.as_raw_fd(), slave.as_raw_fd(), &argv),
            ForkResult::Parent { child } => {
                // The slave belongs to the child now
                drop(slave);
                tracing::debug!(pid = child.as_raw(), slave = %slave_name, "spawned child on pty");
                Ok(Pty {
                    master,
                    child_pid: child,
                })
            },
        }
    }

    /// Get the child process ID
    pub fn child_pid(&self) -> Pid {
        self.child_pid
    }

    /// Read from the PTY master.
    ///
    /// Returns `Ok(0)` at end-of-stream. Linux reports a master whose slave
    /// side has been closed by every process as `EIO`, which is folded into
    /// end-of-stream here.
    pub fn read(&self, buf: &mut [u8]) -> PtyResult<usize> {
        loop {
            match read(self.master.as_raw_fd(), buf) {
                Ok(n) => return Ok(n),
                Err(Errno::EINTR) => continue,
                Err(Errno::EIO) => return Ok(0),
                Err(e) => return Err(PtyError::Read(e)),
            }
        }
    }

    /// Write to the PTY master
    ///
    /// Returns the number of bytes written.
    pub fn write(&self, data: &[u8]) -> PtyResult<usize> {
        write(self.master.as_raw_fd(), data).map_err(PtyError::Write)
    }

    /// Write all data to the PTY master.
    ///
    /// Interrupted writes are retried. If the master happens to be
    /// non-blocking, a full input queue is waited out rather than reported.
    pub fn write_all(&self, mut data: &[u8]) -> PtyResult<()> {
        while !data.is_empty() {
            match self.write(data) {
                Ok(n) => data = &data[n..],
                Err(PtyError::Write(Errno::EINTR)) => continue,
                Err(PtyError::Write(Errno::EAGAIN)) => {
                    self.poll(PollFlags::POLLOUT, -1)?;
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Poll for data available to read
    ///
    /// Returns true if a read would not block, false if the timeout expired.
    /// A hung-up master counts as readable so the next read can observe it.
    pub fn poll_read(&self, timeout_ms: i32) -> PtyResult<bool> {
        self.poll(PollFlags::POLLIN, timeout_ms)
    }

    fn poll(&self, events: PollFlags, timeout_ms: i32) -> PtyResult<bool> {
        let fd = self.as_fd();
        let mut fds = [PollFd::new(&fd, events)];
        loop {
            match poll(&mut fds, timeout_ms) {
                Ok(0) => return Ok(false),
                Ok(_) => {
                    let wanted = events | PollFlags::POLLHUP | PollFlags::POLLERR;
                    return Ok(fds[0].revents().is_some_and(|r| r.intersects(wanted)));
                },
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(PtyError::Poll(e)),
            }
        }
    }

    /// Resize the PTY
    pub fn resize(&self, size: WindowSize) -> PtyResult<()> {
        set_window_size(self.master.as_raw_fd(), size)
    }

    /// Current window size of the PTY
    pub fn window_size(&self) -> PtyResult<WindowSize> {
        get_window_size(self.master.as_raw_fd())
    }
}

impl AsFd for Pty {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the master fd stays open for as long as self is borrowed
        unsafe { BorrowedFd::borrow_raw(self.master.as_raw_fd()) }
    }
}

fn to_cstring(s: &OsStr) -> PtyResult<CString> {
    CString::new(s.as_bytes()).map_err(|_| PtyError::NulInArgument(s.to_string_lossy().into_owned()))
}

/// Runs in the forked child. Never returns.
fn exec_child(master: RawFd, slave: RawFd, argv: &[CString]) -> ! {
    let _ = close(master);

    if setsid().is_err() {
        exit_child(1);
    }

    // SAFETY: TIOCSCTTY is a valid ioctl on a terminal fd we own
    if unsafe { libc::ioctl(slave, libc::TIOCSCTTY as _, 0) } < 0 {
        exit_child(1);
    }

    for target in [STDIN_FILENO, STDOUT_FILENO, STDERR_FILENO] {
        if dup2(slave, target).is_err() {
            exit_child(1);
        }
    }
    if slave > STDERR_FILENO {
        let _ = close(slave);
    }

    for sig in RESET_SIGNALS {
        // SAFETY: restoring the default disposition installs no handler
        let _ = unsafe { signal::signal(sig, SigHandler::SigDfl) };
    }

    let _ = execvp(&argv[0], argv);
    exit_child(EXEC_FAILURE_STATUS)
}

fn exit_child(code: i32) -> ! {
    // SAFETY: _exit skips atexit handlers and stdio flushing that belong to
    // the parent's copy of the address space
    unsafe { libc::_exit(code) }
}

/// Set the window size on a PTY file descriptor
fn set_window_size(fd: RawFd, size: WindowSize) -> PtyResult<()> {
    let winsize: libc::winsize = size.into();

    // SAFETY: TIOCSWINSZ is a valid ioctl for setting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, &winsize) };

    if result < 0 {
        Err(PtyError::SetWinsize(Errno::last()))
    } else {
        Ok(())
    }
}

/// Get the window size from a PTY file descriptor
fn get_window_size(fd: RawFd) -> PtyResult<WindowSize> {
    let mut winsize = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    // SAFETY: TIOCGWINSZ is a valid ioctl for getting window size
    let result = unsafe { libc::ioctl(fd, libc::TIOCGWINSZ, &mut winsize) };

    if result < 0 {
        Err(PtyError::GetWinsize(Errno::last()))
    } else {
        Ok(winsize.into())
    }
}
