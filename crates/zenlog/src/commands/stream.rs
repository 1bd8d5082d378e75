//! `write-to-logger` and `write-to-outer`: stdin to the log only, or to the
//! terminal only.

use super::Invocation;
use crate::transport::LoggerClient;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use tokio::io::{AsyncBufReadExt, BufReader};
use zenlog_core::Message;

/// Upper bound on the bytes carried by one `write` message. Hex doubles
/// them, which keeps every encoded line below `PIPE_BUF`.
const MAX_WRITE_CHUNK: usize = 1024;

pub async fn write_to_logger(inv: &Invocation) -> Result<()> {
    let client = LoggerClient::new(inv.session()?);
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = Vec::new();
    loop {
        line.clear();
        if stdin.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        client
            .send_all(&write_messages(&line))
            .await
            .context("write-to-logger failed")?;
    }
    Ok(())
}

pub fn write_to_outer(inv: &Invocation) -> Result<()> {
    let ctx = inv.session()?;
    let tty = OpenOptions::new()
        .write(true)
        .open(&ctx.outer_tty)
        .with_context(|| format!("unable to open {}", ctx.outer_tty))?;
    copy_with_crlf(io::stdin().lock(), tty)?;
    Ok(())
}

/// Copy lines, replacing each line ending with CRLF. The terminal is in raw
/// mode during a session, so a bare LF would not return the carriage.
fn copy_with_crlf<R: BufRead, W: Write>(mut input: R, mut output: W) -> io::Result<()> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        output.write_all(&line)?;
        output.write_all(b"\r\n")?;
    }
    output.flush()
}

/// Split one input line into `write` messages, bytes passed through as-is.
fn write_messages(line: &[u8]) -> Vec<Message> {
    line.chunks(MAX_WRITE_CHUNK)
        .map(|chunk| Message::Write {
            data: chunk.to_vec(),
        })
        .collect()
}
