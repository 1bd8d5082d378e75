//! Named-pipe transport between helper invocations and the logger.
//!
//! Each session has two FIFOs in its temp directory: `logger-in` (helpers
//! write requests) and `logger-out` (the logger writes replies). The logger
//! opens both read-write so that neither end ever observes EOF or `ENXIO`
//! while the session lives; helpers open them the ordinary way, so a helper
//! talking to a dead session fails fast.
//!
//! Lines of a `start-command` carry the whole environment and can exceed
//! `PIPE_BUF`, so a helper holds an exclusive lock on `logger-in.lock`
//! while it writes; lines from concurrent helpers never interleave.

use std::ffi::{CString, OsString};
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tracing::{debug, warn};
use zenlog_core::codec::LineDecoder;
use zenlog_core::{
    Message, Reply, SessionContext, WireMessage, ZenlogError, ZenlogResult, RECEIVE_TIMEOUT,
};

const LOGGER_IN: &str = "logger-in";
const LOGGER_OUT: &str = "logger-out";
const LOCK_RETRY: Duration = Duration::from_millis(2);

/// Create a FIFO at `path` readable and writable by the owner only.
pub fn make_fifo(path: &Path) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Create `dir` and any missing parents, accessible by the owner only.
pub fn create_private_dir(dir: &Path) -> io::Result<()> {
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

/// A session's temp directory, removed with everything in it on drop.
#[derive(Debug)]
pub struct SessionDir {
    path: PathBuf,
}

impl SessionDir {
    pub fn create(path: PathBuf) -> io::Result<Self> {
        create_private_dir(&path)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SessionDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(dir = %self.path.display(), "removed session dir"),
            Err(e) => warn!(dir = %self.path.display(), error = %e, "failed to remove session dir"),
        }
    }
}

/// The pair of FIFOs belonging to one session.
#[derive(Debug, Clone)]
pub struct SessionPipes {
    pub logger_in: PathBuf,
    pub logger_out: PathBuf,
}

impl SessionPipes {
    /// Create the session directory and both FIFOs inside it.
    pub fn create(session_dir: &Path) -> io::Result<Self> {
        create_private_dir(session_dir)?;

        let pipes = Self {
            logger_in: session_dir.join(LOGGER_IN),
            logger_out: session_dir.join(LOGGER_OUT),
        };
        for path in [&pipes.logger_in, &pipes.logger_out] {
            // Leftovers from a crashed session with a recycled pid.
            if path.exists() {
                std::fs::remove_file(path)?;
            }
            make_fifo(path)?;
        }
        debug!(dir = %session_dir.display(), "created session pipes");
        Ok(pipes)
    }

    /// Logger side: requests in, replies out.
    pub fn open_logger_end(&self) -> io::Result<(pipe::Receiver, ReplyWriter)> {
        let requests = pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&self.logger_in)?;
        let replies = pipe::OpenOptions::new()
            .read_write(true)
            .open_sender(&self.logger_out)?;
        Ok((requests, ReplyWriter { sender: replies }))
    }
}

/// Writes replies without ever blocking the logger.
#[derive(Debug)]
pub struct ReplyWriter {
    sender: pipe::Sender,
}

impl ReplyWriter {
    /// Queue a reply. If the pipe is full (nobody has been reading), the
    /// reply is dropped; the waiting helper, if any, will time out.
    pub fn send(&self, reply: &Reply) -> ZenlogResult<()> {
        let line = reply.encode()?;
        match self.sender.try_write(line.as_bytes()) {
            Ok(n) if n == line.len() => Ok(()),
            Ok(n) => {
                warn!(written = n, len = line.len(), "reply truncated");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                warn!(token = %reply.token(), "reply pipe full, dropping reply");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Helper side of the protocol.
#[derive(Debug, Clone)]
pub struct LoggerClient {
    logger_in: PathBuf,
    logger_out: PathBuf,
    timeout: Duration,
}

impl LoggerClient {
    pub fn new(ctx: &SessionContext) -> Self {
        Self::with_paths(ctx.logger_in.clone(), ctx.logger_out.clone())
    }

    pub fn with_paths(logger_in: PathBuf, logger_out: PathBuf) -> Self {
        Self {
            logger_in,
            logger_out,
            timeout: RECEIVE_TIMEOUT,
        }
    }

    /// Write one message to the logger.
    pub async fn send(&self, message: &Message) -> ZenlogResult<()> {
        self.send_all(std::slice::from_ref(message)).await
    }

    /// Write several messages over one open of the request pipe, holding
    /// the request lock throughout.
    pub async fn send_all(&self, messages: &[Message]) -> ZenlogResult<()> {
        let mut sender = pipe::OpenOptions::new()
            .open_sender(&self.logger_in)
            .map_err(|e| unavailable(&self.logger_in, e))?;
        let _lock = self.lock_requests().await?;
        for message in messages {
            let line = message.encode()?;
            sender
                .write_all(line.as_bytes())
                .await
                .map_err(|e| unavailable(&self.logger_in, e))?;
            debug!(line = %line.trim_end(), "sent to logger");
        }
        Ok(())
    }

    /// Take the exclusive lock that serializes writers of `logger-in`.
    /// Released when the returned file is dropped.
    async fn lock_requests(&self) -> ZenlogResult<File> {
        let path = lock_path(&self.logger_in);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| unavailable(&path, e))?;
        tokio::time::timeout(self.timeout, lock_exclusive(&file))
            .await
            .map_err(|_| ZenlogError::Timeout)??;
        Ok(file)
    }

    /// Read replies until one satisfies `predicate`, or fail with
    /// [`ZenlogError::Timeout`] once the timeout elapses.
    pub async fn receive<F>(&self, mut predicate: F) -> ZenlogResult<Reply>
    where
        F: FnMut(&Reply) -> bool,
    {
        let mut receiver = pipe::OpenOptions::new()
            .open_receiver(&self.logger_out)
            .map_err(|e| unavailable(&self.logger_out, e))?;

        tokio::time::timeout(self.timeout, scan_replies(&mut receiver, &mut predicate))
            .await
            .map_err(|_| ZenlogError::Timeout)?
    }

    /// Send a request and wait for the reply carrying `token`.
    pub async fn request(&self, message: &Message, token: &str) -> ZenlogResult<Reply> {
        self.send(message).await?;
        self.receive(|reply| reply.token() == token).await
    }
}

async fn scan_replies<F>(receiver: &mut pipe::Receiver, predicate: &mut F) -> ZenlogResult<Reply>
where
    F: FnMut(&Reply) -> bool,
{
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; 4096];
    loop {
        let n = receiver.read(&mut buf).await?;
        if n == 0 {
            return Err(ZenlogError::LoggerUnavailable(
                "logger closed its reply pipe".into(),
            ));
        }
        for line in decoder.feed(&buf[..n]) {
            match Reply::decode(&line) {
                Ok(reply) if predicate(&reply) => return Ok(reply),
                Ok(reply) => debug!(token = %reply.token(), "skipping unrelated reply"),
                Err(e) => warn!(error = %e, "skipping malformed reply"),
            }
        }
    }
}

fn lock_path(logger_in: &Path) -> PathBuf {
    let mut path = OsString::from(logger_in.as_os_str());
    path.push(".lock");
    PathBuf::from(path)
}

/// Poll a non-blocking `flock` so waiting never stalls the runtime thread.
async fn lock_exclusive(file: &File) -> io::Result<()> {
    loop {
        // SAFETY: flock on a descriptor owned by `file`, which outlives the call.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
            return Ok(());
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::WouldBlock {
            return Err(err);
        }
        tokio::time::sleep(LOCK_RETRY).await;
    }
}

fn unavailable(path: &Path, e: io::Error) -> ZenlogError {
    ZenlogError::LoggerUnavailable(format!("{}: {e}", path.display()))
}
