//! Browsing recorded commands: `history`, `current-log`, `last-log`,
//! `all-commands`, `list-logs`.
//!
//! Each takes `-r` (raw tree) or `-e` (environment tree); the default is
//! the sanitized tree.

use super::Invocation;
use crate::transport::LoggerClient;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use zenlog_core::logfiles::{list_commands, session_commands, COMMAND_MARKER};
use zenlog_core::protocol::new_token;
use zenlog_core::{CommandEntry, LogKind, LogPaths, Message, Reply};

/// This session's commands, oldest first.
pub fn history(inv: &Invocation, kind: LogKind) -> Result<()> {
    let ctx = inv.session()?;
    let entries = session_commands(&ctx.log_dir, ctx.session_id, ctx.started_at, kind)?;
    print!("{}", render_entries(&entries));
    Ok(())
}

/// Every recorded command under the log directory, oldest first.
pub fn all_commands(inv: &Invocation, kind: LogKind) -> Result<()> {
    let entries = list_commands(&inv.config.log_dir, kind)?;
    print!("{}", render_entries(&entries));
    Ok(())
}

/// Paths only, one per line.
pub fn list_logs(inv: &Invocation, kind: LogKind) -> Result<()> {
    for entry in list_commands(&inv.config.log_dir, kind)? {
        println!("{}", entry.path.display());
    }
    Ok(())
}

/// The log of the command running right now.
pub async fn current_log(inv: &Invocation, kind: LogKind) -> Result<()> {
    let (current, _) = query_logs(inv).await?;
    let Some(san) = current else {
        bail!("no command is being recorded");
    };
    println!("{}", in_tree(&inv.session()?.log_dir, &san, kind).display());
    Ok(())
}

/// The log of the most recently finished command.
pub async fn last_log(inv: &Invocation, kind: LogKind) -> Result<()> {
    let (_, last) = query_logs(inv).await?;
    let Some(san) = last else {
        bail!("no command has finished in this session yet");
    };
    println!("{}", in_tree(&inv.session()?.log_dir, &san, kind).display());
    Ok(())
}

async fn query_logs(inv: &Invocation) -> Result<(Option<String>, Option<String>)> {
    let ctx = inv.session()?;
    let token = new_token();
    let reply = LoggerClient::new(ctx)
        .request(&Message::QueryLogs { token: token.clone() }, &token)
        .await
        .context("cannot query the logger")?;
    match reply {
        Reply::Logs { current, last, .. } => Ok((current, last)),
        other => bail!("unexpected reply from the logger: {other:?}"),
    }
}

/// Map a sanitized log path to the same command's file in `kind`'s tree.
fn in_tree(log_dir: &Path, san: &str, kind: LogKind) -> PathBuf {
    let san = Path::new(san);
    match LogPaths::from_san(log_dir, san) {
        Some(paths) => paths.get(kind).to_path_buf(),
        None => san.to_path_buf(),
    }
}

/// `<path> $ <command>` per line.
fn render_entries(entries: &[CommandEntry]) -> String {
    entries
        .iter()
        .map(|e| format!("{} {} {}\n", e.path.display(), COMMAND_MARKER, e.summary))
        .collect()
}
