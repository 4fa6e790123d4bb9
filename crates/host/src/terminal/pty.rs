// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OS pseudo-terminal ownership: spawn a shell on a fresh PTY pair and
//! expose async read/write/resize over the master side.

use std::ffi::CString;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};

use anyhow::{bail, Context};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, Pid};
use tokio::io::unix::AsyncFd;

/// How the child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

/// What to run on the PTY and with which environment.
#[derive(Debug, Clone)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl ShellSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new(), env: Vec::new(), cwd: None }
    }
}

/// Newtype around the owned master fd for use with `AsyncFd`.
#[derive(Debug)]
struct MasterFd(OwnedFd);

impl AsRawFd for MasterFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

/// A live PTY with a child shell attached.
///
/// The struct exclusively owns the master fd and the child process; dropping
/// it tears both down (SIGHUP, then SIGKILL).
pub struct Pty {
    master: AsyncFd<MasterFd>,
    child: Pid,
    cols: AtomicU16,
    rows: AtomicU16,
}

impl Pty {
    /// Allocate a PTY pair and fork the shell onto the slave side.
    // forkpty requires unsafe: the child is partially initialized post-fork
    #[allow(unsafe_code)]
    pub fn spawn(spec: &ShellSpec, cols: u16, rows: u16) -> anyhow::Result<Self> {
        let winsize = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };

        // SAFETY: forkpty leaves the child in a partially-initialized state;
        // the child branch below only sets env, chdirs, and execs.
        let fork_result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

        match fork_result {
            ForkptyResult::Child => {
                std::env::set_var("TERM", "xterm-256color");
                std::env::set_var("WEFT", "1");
                for (k, v) in &spec.env {
                    std::env::set_var(k, v);
                }
                if let Some(ref dir) = spec.cwd {
                    let _ = nix::unistd::chdir(dir.as_path());
                }

                let mut argv: Vec<CString> = Vec::with_capacity(spec.args.len() + 1);
                match CString::new(spec.program.as_bytes()) {
                    Ok(c) => argv.push(c),
                    Err(_) => std::process::exit(127),
                }
                for arg in &spec.args {
                    match CString::new(arg.as_bytes()) {
                        Ok(c) => argv.push(c),
                        Err(_) => std::process::exit(127),
                    }
                }

                let _ = execvp(&argv[0], &argv);
                // exec failed: nothing sensible to do in the child but exit.
                std::process::exit(127);
            }
            ForkptyResult::Parent { child, master } => {
                set_nonblocking(&master)?;
                let master = AsyncFd::new(MasterFd(master)).context("AsyncFd::new failed")?;
                Ok(Self {
                    master,
                    child,
                    cols: AtomicU16::new(cols),
                    rows: AtomicU16::new(rows),
                })
            }
        }
    }

    /// Read a chunk of shell output from the master side.
    pub async fn read_output(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            match guard.try_io(|inner| nix::unistd::read(inner, buf).map_err(io_err)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write the full buffer to the master side.
    pub async fn write_input(&self, data: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = self.master.writable().await?;
            match guard
                .try_io(|inner| nix::unistd::write(&inner.get_ref().0, &data[offset..]).map_err(io_err))
            {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Update the PTY window size. Returns `false` without touching the PTY
    /// when the dimensions already match.
    // TIOCSWINSZ requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> anyhow::Result<bool> {
        if self.cols.load(Ordering::Relaxed) == cols && self.rows.load(Ordering::Relaxed) == rows {
            return Ok(false);
        }
        self.cols.store(cols, Ordering::Relaxed);
        self.rows.store(rows, Ordering::Relaxed);

        let ws = Winsize { ws_col: cols, ws_row: rows, ws_xpixel: 0, ws_ypixel: 0 };
        // SAFETY: TIOCSWINSZ sets the window size on the PTY master fd; the
        // Winsize struct is fully initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            bail!("TIOCSWINSZ ioctl failed: {}", io::Error::last_os_error());
        }
        Ok(true)
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols.load(Ordering::Relaxed), self.rows.load(Ordering::Relaxed))
    }

    pub fn child_pid(&self) -> u32 {
        self.child.as_raw() as u32
    }

    /// Ask the shell to hang up. The pump notices the PTY EOF and drains.
    pub fn signal_hangup(&self) {
        let _ = kill(self.child, Signal::SIGHUP);
    }

    /// Force-kill the shell after the close grace period.
    pub fn signal_kill(&self) {
        let _ = kill(self.child, Signal::SIGKILL);
    }

    /// Block until the child exits. Run on a blocking thread.
    pub fn wait_exit(&self) -> anyhow::Result<ExitStatus> {
        wait_for_exit(self.child)
    }
}

impl Drop for Pty {
    fn drop(&mut self) {
        // Best-effort teardown if the pump never reaped the child.
        let _ = kill(self.child, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let _ = kill(self.child, Signal::SIGKILL);
        let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
    }
}

/// Whether an output-side read error means "shell exited" rather than a
/// genuine IO fault. Linux reports EIO on the master once the slave closes.
pub fn is_closed_pty_error(e: &io::Error) -> bool {
    e.raw_os_error() == Some(libc::EIO)
}

fn set_nonblocking(fd: &impl std::os::fd::AsFd) -> io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> io::Error {
    io::Error::from_raw_os_error(e as i32)
}

fn wait_for_exit(pid: Pid) -> anyhow::Result<ExitStatus> {
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
            Err(nix::errno::Errno::ECHILD) => {
                // Already reaped (e.g. by Drop on another path).
                return Ok(ExitStatus { code: None, signal: None });
            }
            Err(e) => bail!("waitpid failed: {e}"),
        }
    }
}
