//! PTY wrapper using portable-pty.
//!
//! A [`Pty`] is opened first so its slave name can go into the session
//! exports; [`Pty::spawn`] then starts the shell on it and yields the
//! running [`PtySession`].

use super::master::PtyMaster;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtyPair, PtySize};
use std::ffi::CStr;
use std::io;
use std::os::fd::RawFd;
use tracing::{debug, info};
use zenlog_core::{ZenlogError, ZenlogResult};

/// Shell used to interpret the start command.
pub const SHELL: &str = "/bin/sh";

/// An open pty with no child yet.
pub struct Pty {
    pair: PtyPair,
}

impl Pty {
    pub fn open(cols: u16, rows: u16) -> ZenlogResult<Self> {
        let pair = native_pty_system()
            .openpty(pty_size(cols, rows))
            .map_err(|e| ZenlogError::Pty(format!("failed to open PTY: {e}")))?;
        debug!(cols, rows, "PTY opened");
        Ok(Self { pair })
    }

    /// Device path of the slave side, e.g. `/dev/pts/7`.
    pub fn tty_name(&self) -> ZenlogResult<String> {
        let fd = self
            .pair
            .master
            .as_raw_fd()
            .ok_or_else(|| ZenlogError::Pty("PTY master has no descriptor".into()))?;
        slave_name(fd)
            .map_err(|e| ZenlogError::Pty(format!("cannot determine PTY slave name: {e}")))
    }

    /// Run `start_command` through `/bin/sh -c exec ...` with `exports`
    /// added to the inherited environment.
    pub fn spawn(self, start_command: &str, exports: &[(&str, String)]) -> ZenlogResult<PtySession> {
        let mut cmd = CommandBuilder::new(SHELL);
        cmd.arg("-c");
        cmd.arg(format!("exec {start_command}"));
        // portable-pty would otherwise start in $HOME.
        if let Ok(cwd) = std::env::current_dir() {
            cmd.cwd(cwd);
        }
        for (key, value) in exports {
            cmd.env(key, value);
        }

        let child = self
            .pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| ZenlogError::Pty(format!("failed to spawn {start_command}: {e}")))?;
        // Only the child may hold the slave, so the master hangs up when it exits.
        drop(self.pair.slave);

        let fd = self
            .pair
            .master
            .as_raw_fd()
            .ok_or_else(|| ZenlogError::Pty("PTY master has no descriptor".into()))?;
        let io = PtyMaster::from_raw(fd)?;

        info!(command = %start_command, pid = ?child.process_id(), "shell spawned");
        Ok(PtySession {
            master: self.pair.master,
            io,
            child,
        })
    }
}

/// A pty with the shell running on it.
pub struct PtySession {
    master: Box<dyn MasterPty + Send>,
    io: PtyMaster,
    child: Box<dyn Child + Send + Sync>,
}

impl PtySession {
    /// Split into the I/O half, shared by the forwarders, and the control half.
    pub fn split(self) -> (PtyMaster, PtyControl) {
        (
            self.io,
            PtyControl {
                master: self.master,
                child: self.child,
            },
        )
    }
}

/// Resize and child management. Owned by the event dispatcher alone.
pub struct PtyControl {
    master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
}

impl PtyControl {
    pub fn resize(&self, cols: u16, rows: u16) -> ZenlogResult<()> {
        self.master
            .resize(pty_size(cols, rows))
            .map_err(|e| ZenlogError::Pty(format!("PTY resize failed: {e}")))?;
        debug!(cols, rows, "PTY resized");
        Ok(())
    }

    /// Current size as (columns, rows).
    pub fn size(&self) -> ZenlogResult<(u16, u16)> {
        let size = self
            .master
            .get_size()
            .map_err(|e| ZenlogError::Pty(format!("cannot read PTY size: {e}")))?;
        Ok((size.cols, size.rows))
    }

    /// The child's exit code if it has exited.
    pub fn try_wait(&mut self) -> ZenlogResult<Option<i32>> {
        let status = self.child.try_wait()?;
        Ok(status.map(|s| {
            let code = i32::try_from(s.exit_code()).unwrap_or(-1);
            info!(code, "shell exited");
            code
        }))
    }

    pub fn kill(&mut self) -> ZenlogResult<()> {
        self.child
            .kill()
            .map_err(|e| ZenlogError::Pty(format!("kill failed: {e}")))
    }
}

fn slave_name(master: RawFd) -> io::Result<String> {
    let mut buf = [0 as libc::c_char; 128];
    // SAFETY: buf is writable for its full length and ptsname_r NUL-terminates on success.
    let rc = unsafe { libc::ptsname_r(master, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    // SAFETY: ptsname_r succeeded, so buf holds a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Ok(name.to_string_lossy().into_owned())
}

fn pty_size(cols: u16, rows: u16) -> PtySize {
    PtySize {
        rows,
        cols,
        pixel_width: 0,
        pixel_height: 0,
    }
}
