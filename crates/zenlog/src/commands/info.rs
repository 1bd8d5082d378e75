//! `outer-tty`, `logger-pipe`, `zenlog-bin`, `temp-dir`.

use super::Invocation;
use anyhow::{Context, Result};
use zenlog_core::signature::resolve_current_exe;

pub fn outer_tty(inv: &Invocation) -> Result<()> {
    println!("{}", inv.session()?.outer_tty);
    Ok(())
}

pub fn logger_pipe(inv: &Invocation) -> Result<()> {
    println!("{}", inv.session()?.logger_in.display());
    Ok(())
}

pub fn zenlog_bin() -> Result<()> {
    let exe = resolve_current_exe().context("cannot locate the zenlog binary")?;
    println!("{}", exe.display());
    Ok(())
}

pub fn temp_dir(inv: &Invocation) -> Result<()> {
    println!("{}", inv.config.temp_dir.display());
    Ok(())
}
