// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;

use anyhow::Context;
use bytes::Bytes;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;

use super::{ExitStatus, PtyEvent};

/// PTY master side, readable/writable through tokio's `AsyncFd`.
#[derive(Debug)]
struct Master(OwnedFd);

impl AsRawFd for Master {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

fn errno_to_io(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn winsize(cols: u16, rows: u16) -> Winsize {
    Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 }
}

/// A PTY child process and its master fd.
pub struct PtyChild {
    master: AsyncFd<Master>,
    child_pid: Pid,
}

impl PtyChild {
    /// Fork a child onto a fresh PTY and exec `command` in `cwd`.
    ///
    /// The environment is inherited; `TERM` is pinned for the child. Spawn
    /// failure is fatal to the caller — there is no session without a child.
    // forkpty requires unsafe: the child is partially initialized after fork
    #[allow(unsafe_code)]
    pub fn spawn(command: &[String], cwd: &Path, cols: u16, rows: u16) -> anyhow::Result<Self> {
        if command.is_empty() {
            anyhow::bail!("empty child command");
        }
        let size = winsize(cols, rows);

        // SAFETY: forkpty is unsafe because the child runs with partially
        // copied state after fork. The child branch only chdirs, sets env,
        // and execs.
        let result = unsafe { forkpty(&size, None) }.context("forkpty failed")?;

        match result {
            ForkptyResult::Child => {
                if std::env::set_current_dir(cwd).is_err() {
                    // Deliberately crude: the PTY is the only channel left.
                    std::process::exit(127);
                }
                std::env::set_var("TERM", "xterm-256color");

                let c_args: Vec<CString> = command
                    .iter()
                    .map(|s| CString::new(s.as_bytes()))
                    .collect::<Result<_, _>>()
                    .context("invalid command argument")?;
                execvp(&c_args[0], &c_args).context("execvp failed")?;
                unreachable!();
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let master = AsyncFd::new(Master(master)).context("AsyncFd::new failed")?;
                Ok(Self { master, child_pid: child })
            }
        }
    }

    /// OS pid of the child process.
    pub fn child_pid(&self) -> u32 {
        self.child_pid.as_raw() as u32
    }

    /// Pump the PTY until the child exits.
    ///
    /// Output chunks go to `output`; `events` carries writes and resizes
    /// from channel peers. Returns the child's exit status after reaping it
    /// on a blocking thread.
    pub async fn run(
        self,
        output: mpsc::Sender<Bytes>,
        mut events: mpsc::Receiver<PtyEvent>,
    ) -> anyhow::Result<ExitStatus> {
        let pid = self.child_pid;
        let mut buf = vec![0u8; 8192];

        loop {
            tokio::select! {
                read = read_chunk(&self.master, &mut buf) => {
                    match read {
                        Ok(0) => break,
                        Ok(n) => {
                            let chunk = Bytes::copy_from_slice(&buf[..n]);
                            if output.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        // EIO from the master means the child side is gone.
                        Err(e) if e.raw_os_error() == Some(libc::EIO) => break,
                        Err(e) => return Err(e.into()),
                    }
                }
                event = events.recv() => {
                    match event {
                        Some(PtyEvent::Write(data)) => {
                            write_all(&self.master, &data).await?;
                        }
                        Some(PtyEvent::Resize { cols, rows }) => {
                            if let Err(e) = self.resize(cols, rows) {
                                tracing::warn!(err = %e, "pty resize failed");
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        let status = tokio::task::spawn_blocking(move || reap(pid))
            .await
            .context("join reap thread")??;
        Ok(status)
    }

    /// Apply a new window size to the PTY.
    // TIOCSWINSZ needs a raw libc::ioctl call
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<()> {
        let ws = winsize(cols, rows);
        // SAFETY: TIOCSWINSZ writes a well-formed Winsize to the master fd.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            anyhow::bail!("TIOCSWINSZ failed: {}", io::Error::last_os_error());
        }
        Ok(())
    }
}

impl Drop for PtyChild {
    fn drop(&mut self) {
        // Best-effort: hang up, then make sure.
        let _ = kill(self.child_pid, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let _ = kill(self.child_pid, Signal::SIGKILL);
        let _ = waitpid(self.child_pid, Some(WaitPidFlag::WNOHANG));
    }
}

fn set_nonblocking(fd: &impl std::os::fd::AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(errno_to_io)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(errno_to_io)?;
    Ok(())
}

async fn read_chunk(afd: &AsyncFd<Master>, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| nix::unistd::read(&inner.get_ref().0, buf).map_err(errno_to_io)) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

async fn write_all(afd: &AsyncFd<Master>, data: &[u8]) -> io::Result<()> {
    let mut offset = 0;
    while offset < data.len() {
        let mut guard = afd.writable().await?;
        match guard
            .try_io(|inner| nix::unistd::write(&inner.get_ref().0, &data[offset..]).map_err(errno_to_io))
        {
            Ok(Ok(n)) => offset += n,
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

/// Block until the child exits and translate the wait status.
fn reap(pid: Pid) -> anyhow::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => anyhow::bail!("waitpid failed: {e}"),
        }
    }
}
