//! Signals and task failures, funnelled into one event channel.

use std::future::Future;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use zenlog_core::ZenlogResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The outer terminal changed size.
    WindowResized,
    /// SIGCHLD arrived; the child may have exited.
    ChildSignal,
    /// A pipeline task stopped with an error.
    TaskFailed { task: &'static str, error: String },
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Register SIGWINCH and SIGCHLD handlers and forward them as events.
///
/// Must be called before the child is spawned so no SIGCHLD is missed.
pub fn watch_signals(events: EventSender) -> std::io::Result<JoinHandle<()>> {
    let mut winch = signal(SignalKind::window_change())?;
    let mut chld = signal(SignalKind::child())?;
    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                Some(()) = winch.recv() => SessionEvent::WindowResized,
                Some(()) = chld.recv() => SessionEvent::ChildSignal,
                else => break,
            };
            debug!(?event, "signal");
            if events.send(event).is_err() {
                break;
            }
        }
    }))
}

/// Spawn a task that must outlive the shell: any exit, clean or not, is
/// reported as [`SessionEvent::TaskFailed`].
pub fn spawn_essential<F>(task: &'static str, events: EventSender, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ZenlogResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let error = match fut.await {
            Ok(()) => "stopped".to_string(),
            Err(e) => e.to_string(),
        };
        warn!(task, %error, "essential session task ended");
        let _ = events.send(SessionEvent::TaskFailed { task, error });
    })
}

/// Spawn a pipeline task whose error is reported as [`SessionEvent::TaskFailed`].
pub fn spawn_reporting<F>(task: &'static str, events: EventSender, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ZenlogResult<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = fut.await {
            error!(task, error = %e, "session task failed");
            let _ = events.send(SessionEvent::TaskFailed {
                task,
                error: e.to_string(),
            });
        }
    })
}
