//! End-to-end tests for the PTY bridge
//!
//! These drive real children on real PTYs, both through the library
//! session loop and through the `ptyd` binary.

use std::ffi::OsStr;
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use ptyd::pty::Pty;
use ptyd::{Frame, ProcessController, Session, SessionConfig};

/// Read from `stream` until `needle` shows up or the timeout expires
fn read_until(stream: &mut UnixStream, needle: &str, timeout: Duration) -> String {
    stream
        .set_read_timeout(Some(Duration::from_millis(50)))
        .unwrap();
    let deadline = Instant::now() + timeout;
    let mut output = Vec::new();
    let mut buf = [0u8; 1024];

    while Instant::now() < deadline && !String::from_utf8_lossy(&output).contains(needle) {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => output.extend_from_slice(&buf[..n]),
            Err(_) => continue,
        }
    }

    String::from_utf8_lossy(&output).into_owned()
}

// ============================================================================
// Library session
// ============================================================================

#[test]
fn test_echo_round_trip_then_close() {
    let (mut controller_in, session_in) = UnixStream::pair().unwrap();
    let (session_out, mut controller_out) = UnixStream::pair().unwrap();

    let handle = thread::spawn(move || {
        let config = SessionConfig::default();
        let pty = Pty::spawn(OsStr::new("/bin/cat"), &[] as &[&str], config.window)
            .expect("Failed to spawn PTY");
        let session = Session::new(
            ProcessController::new(pty),
            session_in.as_fd(),
            session_out,
            &config,
        )
        .expect("Failed to start session");
        session.run()
    });

    controller_in
        .write_all(&Frame::data("hi\n").encode().unwrap())
        .unwrap();
    let output = read_until(&mut controller_out, "hi", Duration::from_secs(5));
    assert!(output.contains("hi"), "output: {:?}", output);

    controller_in.write_all(&Frame::Close.encode().unwrap()).unwrap();
    let code = handle.join().unwrap();

    // cat dies of SIGHUP
    assert_eq!(code, 128 + 1);
}

#[test]
fn test_frames_split_across_writes() {
    let (mut controller_in, session_in) = UnixStream::pair().unwrap();
    let (session_out, mut controller_out) = UnixStream::pair().unwrap();

    let handle = thread::spawn(move || {
        let config = SessionConfig::default();
        let pty = Pty::spawn(
            OsStr::new("/bin/sh"),
            &["-c", "read line; echo \"line=$line\"; exit 6"],
            config.window,
        )
        .expect("Failed to spawn PTY");
        let session = Session::new(
            ProcessController::new(pty),
            session_in.as_fd(),
            session_out,
            &config,
        )
        .expect("Failed to start session");
        session.run()
    });

    let wire = Frame::data("split\n").encode().unwrap();
    for byte in &wire {
        controller_in.write_all(std::slice::from_ref(byte)).unwrap();
        thread::sleep(Duration::from_millis(5));
    }

    let output = read_until(&mut controller_out, "line=split", Duration::from_secs(5));
    assert!(output.contains("line=split"), "output: {:?}", output);
    assert_eq!(handle.join().unwrap(), 6);
}

// ============================================================================
// Binary
// ============================================================================

fn ptyd() -> Command {
    Command::new(env!("CARGO_BIN_EXE_ptyd"))
}

#[test]
fn test_binary_without_program_exits_2() {
    let status = ptyd()
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(2));
}

#[test]
fn test_binary_relays_output_and_exit_code() {
    let output = ptyd()
        .args(["/bin/sh", "-c", "printf ready; exit 5"])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(5));
    assert!(String::from_utf8_lossy(&output.stdout).contains("ready"));
}

#[test]
fn test_binary_exec_failure_exits_127() {
    let status = ptyd()
        .arg("/nonexistent/ptyd-test-program")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .status()
        .unwrap();
    assert_eq!(status.code(), Some(127));
}

#[test]
fn test_binary_initial_window_size() {
    let output = ptyd()
        .args(["--cols", "132", "--rows", "43", "--", "/bin/sh", "-c", "stty size"])
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(0));
    assert!(String::from_utf8_lossy(&output.stdout).contains("43 132"));
}

#[test]
fn test_binary_data_frame_over_stdin() {
    let mut child = ptyd()
        .args(["/bin/sh", "-c", "read word; echo \"word=$word\"; exit 3"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()
        .unwrap();

    let mut stdin = child.stdin.take().unwrap();
    stdin
        .write_all(&Frame::data("bridge\n").encode().unwrap())
        .unwrap();
    drop(stdin);

    let output = child.wait_with_output().unwrap();
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stdout).contains("word=bridge"));
}
