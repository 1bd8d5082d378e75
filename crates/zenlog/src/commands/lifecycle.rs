//! `start-command`, `end-command` (alias `stop-log`), `flush` and
//! `check-bin-update`: the prompt-time hooks of the shell integration.

use super::{utf8_env, Invocation};
use crate::transport::LoggerClient;
use anyhow::{Context, Result};
use chrono::Local;
use tracing::debug;
use zenlog_core::protocol::new_token;
use zenlog_core::signature::binary_ctime;
use zenlog_core::{Message, Reply, StartRequest};

pub const BIN_UPDATED_HINT: &str =
    "Zenlog binary updated. Run \"zenlog_restart\" (or \"exit 13\") to restart a zenlog session.";

/// Tell the logger a command is about to run. Returns once its log files
/// exist, so the command's first byte of output is attributed to it.
pub async fn start_command(inv: &Invocation, words: &[String]) -> Result<()> {
    let ctx = inv.session()?;
    let request = StartRequest {
        command: words.join(" "),
        started_at: Local::now(),
        env: utf8_env().collect(),
    };
    let token = new_token();
    let reply = LoggerClient::new(ctx)
        .request(&Message::StartCommand { token: token.clone(), request }, &token)
        .await
        .context("start-command failed")?;
    if let Reply::Started { san_path, .. } = reply {
        debug!(path = %san_path, "command logs opened");
    }
    Ok(())
}

pub async fn end_command(inv: &Invocation) -> Result<()> {
    let ctx = inv.session()?;
    let token = new_token();
    let reply = LoggerClient::new(ctx)
        .request(&Message::EndCommand { token: token.clone() }, &token)
        .await
        .context("end-command failed")?;
    if let Reply::Ended { san_path, .. } = reply {
        debug!(path = ?san_path, "command logs closed");
    }
    Ok(())
}

pub async fn flush(inv: &Invocation) -> Result<()> {
    LoggerClient::new(inv.session()?)
        .send(&Message::Flush)
        .await
        .context("flush failed")?;
    Ok(())
}

/// 0 if the binary on disk is the one that started the session; otherwise
/// prints a restart hint and returns 1.
pub fn check_bin_update(inv: &Invocation) -> Result<i32> {
    let ctx = inv.session()?;
    let ctime = binary_ctime(&ctx.bin)
        .with_context(|| format!("cannot stat {}", ctx.bin.display()))?;
    if ctx.binary_updated(ctime) {
        eprintln!("{BIN_UPDATED_HINT}");
        return Ok(1);
    }
    Ok(0)
}
