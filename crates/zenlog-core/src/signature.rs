//! Executable signatures for session membership and version skew detection.
//!
//! A signature is `"<resolved exe path>:[<protocol version>]"`. The value a
//! controller exports is prefixed with the pty slave path, so a helper only
//! matches when it runs the same binary, speaks the same protocol and sits
//! on the same terminal.

use crate::error::ZenlogResult;
use crate::protocol::PROTOCOL_VERSION;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Compute the signature of an executable for a protocol version.
pub fn signature(exe: &Path, protocol_version: u32) -> String {
    format!("{}:[{}]", exe.display(), protocol_version)
}

/// Combine a terminal path with a signature into the exported membership value.
pub fn membership_token(tty: &str, signature: &str) -> String {
    format!("{tty}:{signature}")
}

/// Resolve the path of the running executable, following symlinks.
pub fn resolve_current_exe() -> ZenlogResult<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe.canonicalize().unwrap_or(exe))
}

/// Inode change time of a file, in seconds since the epoch.
///
/// Replacing the binary (install, rebuild) always changes this value.
pub fn binary_ctime(exe: &Path) -> ZenlogResult<i64> {
    Ok(std::fs::metadata(exe)?.ctime())
}

/// What the current process knows about itself, computed fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalIdentity {
    pub exe: PathBuf,
    /// Controlling terminal, if any of stdin/stdout/stderr is one.
    pub tty: Option<String>,
    pub protocol_version: u32,
}

impl LocalIdentity {
    pub fn new(exe: PathBuf, tty: Option<String>) -> Self {
        Self {
            exe,
            tty,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    pub fn signature(&self) -> String {
        signature(&self.exe, self.protocol_version)
    }

    /// The value a controller on this terminal would have exported.
    pub fn membership_token(&self) -> Option<String> {
        self.tty
            .as_deref()
            .map(|tty| membership_token(tty, &self.signature()))
    }
}
