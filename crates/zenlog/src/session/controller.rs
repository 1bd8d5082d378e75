//! The session controller: one shell on a pty, every byte it prints copied
//! to the terminal and to the logger.
//!
//! ```text
//!   stdin ──(blocking reader)──▶ input forwarder ──▶ pty master
//!   pty master ──▶ output forwarder ──▶ stdout
//!                                  └──▶ logger inbox ◀── request reader ◀── logger-in
//!   SIGWINCH / SIGCHLD / task errors ──▶ dispatcher (owns the child)
//! ```

use super::events::{self, EventSender, SessionEvent};
use super::master::PtyMaster;
use super::pty::{Pty, PtyControl};
use crate::config::Config;
use crate::logger::{self, LoggerInput, Segmenter};
use crate::terminal::{self, RawModeGuard};
use crate::transport::{SessionDir, SessionPipes};
use anyhow::{Context, Result};
use chrono::Utc;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zenlog_core::signature::{binary_ctime, membership_token, resolve_current_exe, signature};
use zenlog_core::{LogStore, Message, SessionContext, ZenlogResult, PROTOCOL_VERSION};

const INBOX_CAPACITY: usize = 256;
const READ_BUF_SIZE: usize = 32 * 1024;

/// Status reported when the shell's own status could not be obtained.
const FAILURE_STATUS: i32 = 1;

/// Run a full session and return the shell's exit status.
///
/// An error means the session could not be set up and no shell ran.
pub async fn run(config: &Config) -> Result<i32> {
    let session_id = std::process::id();
    let started_at = Utc::now();
    let outer_tty =
        terminal::controlling_tty().context("zenlog must be started from a terminal")?;
    let exe = resolve_current_exe().context("cannot locate the zenlog binary")?;
    let bin_ctime = binary_ctime(&exe)?;

    let session_dir = SessionDir::create(config.session_dir(session_id))
        .context("failed to create the session directory")?;
    let pipes = SessionPipes::create(session_dir.path())
        .context("failed to create the logger pipes")?;
    let (requests, replies) = pipes
        .open_logger_end()
        .context("failed to open the logger pipes")?;

    let (cols, rows) = terminal::get_terminal_size();
    let pty = Pty::open(cols, rows)?;
    let tty = pty.tty_name()?;
    let ctx = SessionContext {
        signature: membership_token(&tty, &signature(&exe, PROTOCOL_VERSION)),
        logger_in: pipes.logger_in.clone(),
        logger_out: pipes.logger_out.clone(),
        outer_tty,
        bin_ctime,
        tty,
        session_id,
        started_at,
        log_dir: config.log_dir.clone(),
        bin: exe,
    };
    info!(tty = %ctx.tty, outer = %ctx.outer_tty, log_dir = %ctx.log_dir.display(), "starting session");

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let signals = events::watch_signals(events_tx.clone())?;
    let raw_mode = RawModeGuard::enter()?;
    let session = pty.spawn(&config.start_command, &ctx.exports())?;
    let (master, mut control) = session.split();
    let master = Arc::new(master);

    let (inbox_tx, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
    let store = LogStore::new(config.log_dir.clone(), session_id).starting_at(started_at);
    let segmenter = Segmenter::new(store);
    let logger = events::spawn_essential(
        "logger",
        events_tx.clone(),
        logger::run(segmenter, inbox_rx, replies),
    );
    let request_reader = tokio::spawn(logger::forward_requests(requests, inbox_tx.clone()));
    let (drain_tx, drain_rx) = watch::channel(false);
    let output = events::spawn_reporting(
        "output",
        events_tx.clone(),
        forward_output(master.clone(), io::stdout(), inbox_tx.clone(), drain_rx),
    );
    let input = forward_input(master);

    // The shell may already be gone if the start command failed immediately.
    check_child_now(&events_tx);
    drop(events_tx);
    let status = dispatch(&mut control, &mut events_rx).await;

    input.abort();
    let _ = drain_tx.send(true);
    if let Err(e) = output.await {
        warn!(error = %e, "output forwarder did not finish cleanly");
    }
    if inbox_tx
        .send(LoggerInput::Control(Message::ChildDied))
        .await
        .is_err()
    {
        debug!("logger already stopped");
    }
    drop(inbox_tx);
    request_reader.abort();
    if let Err(e) = logger.await {
        warn!(error = %e, "logger did not finish cleanly");
    }
    signals.abort();
    info!(status, "session ended");
    drop(session_dir);
    drop(raw_mode);
    Ok(status)
}

fn check_child_now(events: &EventSender) {
    let _ = events.send(SessionEvent::ChildSignal);
}

/// Handle events until the shell exits. Sole owner of the child.
async fn dispatch(
    control: &mut PtyControl,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> i32 {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::WindowResized => {
                let (cols, rows) = terminal::get_terminal_size();
                if control.size().ok() == Some((cols, rows)) {
                    continue;
                }
                if let Err(e) = control.resize(cols, rows) {
                    warn!(error = %e, "failed to propagate window size");
                }
            }
            SessionEvent::ChildSignal => match control.try_wait() {
                Ok(Some(status)) => return status,
                Ok(None) => {}
                Err(e) => {
                    error!(error = %e, "cannot wait for the shell");
                    let _ = control.kill();
                    return FAILURE_STATUS;
                }
            },
            SessionEvent::TaskFailed { task, error } => {
                warn!(task, %error, "hanging up the shell");
                if let Err(e) = control.kill() {
                    error!(error = %e, "failed to kill the shell");
                }
            }
        }
    }
    FAILURE_STATUS
}

/// Copies pty output to the terminal first, then to the logger.
struct Fanout<W> {
    terminal: W,
    inbox: mpsc::Sender<LoggerInput>,
    logger_alive: bool,
}

impl<W: Write> Fanout<W> {
    async fn emit(&mut self, bytes: &[u8]) -> ZenlogResult<()> {
        self.terminal.write_all(bytes)?;
        self.terminal.flush()?;
        if self.logger_alive
            && self
                .inbox
                .send(LoggerInput::Output(bytes.to_vec()))
                .await
                .is_err()
        {
            warn!("logger stopped, output is no longer recorded");
            self.logger_alive = false;
        }
        Ok(())
    }
}

/// Forward pty output until the pty hangs up or a drain is requested; on
/// drain, forward whatever is still buffered and stop. A failed terminal
/// write ends the forwarder with an error.
async fn forward_output<W: Write>(
    master: Arc<PtyMaster>,
    terminal: W,
    inbox: mpsc::Sender<LoggerInput>,
    mut drain: watch::Receiver<bool>,
) -> ZenlogResult<()> {
    let mut out = Fanout {
        terminal,
        inbox,
        logger_alive: true,
    };
    let mut buf = vec![0u8; READ_BUF_SIZE];
    loop {
        let read = tokio::select! {
            r = master.read(&mut buf) => Some(r?),
            _ = drain.changed() => None,
        };
        match read {
            Some(0) => {
                debug!("pty hung up");
                return Ok(());
            }
            Some(n) => out.emit(&buf[..n]).await?,
            None => break,
        }
    }

    loop {
        match master.try_read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.emit(&buf[..n]).await?,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    debug!("output drained");
    Ok(())
}

/// Copy stdin to the pty. The blocking reader thread stays parked in
/// `read` until the next keystroke after the returned task is aborted.
fn forward_input(master: Arc<PtyMaster>) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);

    tokio::task::spawn_blocking(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0u8; 4096];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
    });

    tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            if let Err(e) = master.write_all(&bytes).await {
                warn!(error = %e, "pty write failed");
                break;
            }
        }
    })
}
