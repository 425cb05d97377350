//! ptyd - PTY bridge
//!
//! Spawns a program on a new pseudoterminal, relays its output to stdout
//! and reads framed control input from stdin. The exit status mirrors the
//! child's: its exit code, or 128 + signal if it was killed.

use std::ffi::{OsStr, OsString};
use std::io;
use std::os::fd::AsFd;
use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ptyd::pty::{Pty, WindowSize};
use ptyd::session::FAILURE_EXIT_CODE;
use ptyd::{ProcessController, Session, SessionConfig};

#[derive(Parser, Debug)]
#[command(name = "ptyd", version, about = "Run a program on a PTY driven by a framed stdin protocol")]
struct Args {
    /// Initial terminal width
    #[arg(short, long, default_value_t = 80)]
    cols: u16,

    /// Initial terminal height
    #[arg(short, long, default_value_t = 24)]
    rows: u16,

    /// How often to check child liveness when idle, in milliseconds
    #[arg(long = "poll-interval", value_name = "MS", default_value_t = 100)]
    poll_interval: u64,

    /// Program to run, followed by its arguments
    #[arg(
        value_name = "PROGRAM",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    command: Vec<OsString>,
}

fn main() -> ExitCode {
    // stdout carries PTY output, so logs go to stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    // Usage errors exit with status 2
    let args = Args::parse();

    let config = SessionConfig {
        poll_interval: Duration::from_millis(args.poll_interval),
        window: WindowSize::new(args.cols, args.rows),
        ..SessionConfig::default()
    };

    // `required = true` already rejects an empty command; this only
    // reports it the same way should that attribute ever change
    let Some((program, program_args)) = args.command.split_first() else {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "PROGRAM is required")
            .exit()
    };

    ExitCode::from(exit_status(run(program, program_args, &config)))
}

fn run(program: &OsStr, program_args: &[OsString], config: &SessionConfig) -> i32 {
    tracing::info!(program = %program.to_string_lossy(), "spawning");
    let pty = match Pty::spawn(program, program_args, config.window) {
        Ok(pty) => pty,
        Err(e) => {
            tracing::error!("Failed to spawn PTY: {}", e);
            return FAILURE_EXIT_CODE;
        },
    };
    tracing::info!("PTY spawned, child PID: {}", pty.child_pid());

    let stdin = io::stdin();
    let stdout = io::stdout();
    let session = match Session::new(
        ProcessController::new(pty),
        stdin.as_fd(),
        stdout.lock(),
        config,
    ) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Failed to start session: {}", e);
            return FAILURE_EXIT_CODE;
        },
    };

    session.run()
}

fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(FAILURE_EXIT_CODE as u8)
}
