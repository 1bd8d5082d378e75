//! Terminal utilities: raw mode, size and device names.
//!
//! Wraps crossterm's terminal operations and provides a RAII guard that
//! restores the terminal state on drop.

use anyhow::{Context, Result};
use crossterm::terminal;
use std::ffi::CStr;
use std::os::fd::RawFd;

/// RAII guard that restores the terminal to its original mode on drop.
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enter raw terminal mode.
    ///
    /// Returns a guard that will automatically restore the terminal when dropped.
    pub fn enter() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw terminal mode")?;
        Ok(Self { _private: () })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

/// Get the current terminal size as (columns, rows).
///
/// Falls back to (80, 24) if the size cannot be determined.
pub fn get_terminal_size() -> (u16, u16) {
    match terminal::size() {
        Ok((cols, rows)) if cols > 0 && rows > 0 => (cols, rows),
        _ => (80, 24),
    }
}

pub fn is_tty(fd: RawFd) -> bool {
    // SAFETY: isatty only inspects the descriptor.
    unsafe { libc::isatty(fd) == 1 }
}

/// Device path of the terminal open on `fd`, e.g. `/dev/pts/3`.
pub fn tty_name(fd: RawFd) -> Option<String> {
    if !is_tty(fd) {
        return None;
    }
    let mut buf = [0 as libc::c_char; 256];
    // SAFETY: buf is writable for its full length and ttyname_r NUL-terminates on success.
    let rc = unsafe { libc::ttyname_r(fd, buf.as_mut_ptr(), buf.len()) };
    if rc != 0 {
        return None;
    }
    // SAFETY: ttyname_r succeeded, so buf holds a NUL-terminated string.
    let name = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(name.to_string_lossy().into_owned())
}

/// The first terminal found on stdin, stdout or stderr.
///
/// Helpers are often run with one stream redirected (`cmd | zenlog
/// write-to-logger`), so any of the three identifies the terminal.
pub fn controlling_tty() -> Option<String> {
    [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO]
        .into_iter()
        .find_map(tty_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn terminal_size_returns_nonzero() {
        let (cols, rows) = get_terminal_size();
        assert!(cols > 0);
        assert!(rows > 0);
    }

    #[test]
    fn pipes_are_not_terminals() {
        let (r, w) = std::os::unix::net::UnixStream::pair().unwrap();
        assert!(!is_tty(r.as_raw_fd()));
        assert_eq!(tty_name(w.as_raw_fd()), None);
    }
}
