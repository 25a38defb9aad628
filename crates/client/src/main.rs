// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `relay-attach` — interactive terminal front-end for one session.
//!
//! Connects to a hub (or directly to an agent), focuses a session, puts the
//! local terminal in raw mode, and proxies I/O. Detach with Ctrl+] (0x1d),
//! same as telnet / docker attach.

use std::io::Write;
use std::os::fd::{AsRawFd, BorrowedFd};
use std::time::Duration;

use clap::Parser;
use nix::sys::termios;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use relay_client::link::{self, LinkEvent, LinkSource};
use relay_client::runtime::{Effect, Runtime};
use relay_proto::ws::ClientRequest;

/// Detach key: Ctrl+] (ASCII 0x1d).
const DETACH_KEY: u8 = 0x1d;

/// Animation-frame cadence for paced scrollback writes.
const TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Parser)]
#[command(name = "relay-attach", version, about)]
struct Args {
    /// Hub or agent WebSocket URL (e.g. wss://hub:8443).
    #[arg(env = "RELAY_URL")]
    url: String,

    /// Session id to attach to.
    #[arg(long, env = "RELAY_SESSION_ID")]
    session: String,

    /// Bearer token.
    #[arg(long, env = "RELAY_AUTH_TOKEN")]
    token: String,
}

/// RAII guard restoring the original terminal attributes on drop.
struct RawModeGuard {
    fd: i32,
    original: termios::Termios,
}

impl RawModeGuard {
    fn enter() -> anyhow::Result<Self> {
        let fd = std::io::stdin().as_raw_fd();
        let borrowed = borrow_fd(fd);
        let original = termios::tcgetattr(borrowed)?;
        let mut raw = original.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &raw)?;
        Ok(Self { fd, original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let borrowed = borrow_fd(self.fd);
        let _ = termios::tcsetattr(borrowed, termios::SetArg::TCSAFLUSH, &self.original);
    }
}

/// Create a `BorrowedFd` from a raw fd that we know stays valid.
fn borrow_fd(fd: i32) -> BorrowedFd<'static> {
    // SAFETY: stdin fd 0 is valid for the lifetime of the process.
    #[allow(unsafe_code)]
    unsafe {
        BorrowedFd::borrow_raw(fd)
    }
}

fn terminal_size() -> Option<(u16, u16)> {
    let fd = std::io::stdout().as_raw_fd();
    let mut ws = nix::libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };
    // SAFETY: TIOCGWINSZ reads the terminal size into a properly laid out
    // winsize struct on the stdout fd.
    #[allow(unsafe_code)]
    let ret = unsafe { nix::libc::ioctl(fd, nix::libc::TIOCGWINSZ, &mut ws) };
    if ret == 0 && ws.ws_col > 0 && ws.ws_row > 0 {
        Some((ws.ws_col, ws.ws_row))
    } else {
        None
    }
}

/// Blocking stdin pump on its own thread.
fn spawn_stdin_reader(tx: mpsc::UnboundedSender<Vec<u8>>) {
    std::thread::spawn(move || {
        use std::io::Read;
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) | Err(_) => return,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        return;
                    }
                }
            }
        }
    });
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    let shutdown = CancellationToken::new();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let url = link::authed_url(&args.url, &args.token);
    let handle = link::spawn_link(url, LinkSource::Hub, events_tx, shutdown.clone());

    let guard = match RawModeGuard::enter() {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("error: cannot enter raw mode: {e}");
            return 2;
        }
    };

    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel();
    spawn_stdin_reader(stdin_tx);

    let mut runtime = Runtime::new();
    let mut stdout = std::io::stdout();
    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let code = loop {
        tokio::select! {
            _ = tick.tick() => {
                let effects = runtime.tick();
                apply_effects(&handle, &mut stdout, effects);
            }
            event = events_rx.recv() => {
                let Some((source, event)) = event else { break 1 };
                match event {
                    LinkEvent::Connected => {
                        let effects = runtime.focus(&args.session);
                        apply_effects(&handle, &mut stdout, effects);
                        if let Some((cols, rows)) = terminal_size() {
                            handle.send(ClientRequest::Resize { cols, rows });
                        }
                    }
                    LinkEvent::Frame(text) => {
                        let effects = runtime.handle_frame(source, &text);
                        apply_effects(&handle, &mut stdout, effects);
                    }
                    LinkEvent::Disconnected => {
                        let _ = write!(stdout, "\r\n[relay] link lost, reconnecting...\r\n");
                        let _ = stdout.flush();
                    }
                }
            }
            data = stdin_rx.recv() => {
                let Some(data) = data else { break 0 };
                if data.contains(&DETACH_KEY) {
                    break 0;
                }
                let text = String::from_utf8_lossy(&data).into_owned();
                if let Some(request) = runtime.input(&text) {
                    handle.send(request);
                }
            }
        }
    };

    handle.close();
    shutdown.cancel();
    drop(guard);
    let _ = write!(stdout, "\r\n[relay] detached\r\n");
    let _ = stdout.flush();
    code
}

fn apply_effects(
    handle: &link::LinkHandle,
    stdout: &mut std::io::Stdout,
    effects: Vec<Effect>,
) {
    for effect in effects {
        match effect {
            Effect::FocusWrite(data) => {
                let _ = stdout.write_all(data.as_bytes());
                let _ = stdout.flush();
            }
            Effect::Send(request) => handle.send(request),
            Effect::SplitWrite { .. }
            | Effect::DialAgent { .. }
            | Effect::CloseAgent
            | Effect::State(_) => {}
        }
    }
}
