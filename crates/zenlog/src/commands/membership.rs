//! `in-zenlog`, `fail-if-in-zenlog`, `fail-unless-in-zenlog`.

use super::Invocation;
use anyhow::{bail, Result};

/// Exit status only: 0 inside a session, 1 otherwise.
pub fn in_zenlog(inv: &Invocation) -> i32 {
    if inv.in_zenlog() {
        0
    } else {
        1
    }
}

pub fn fail_if_in_zenlog(inv: &Invocation) -> Result<()> {
    if inv.in_zenlog() {
        bail!("Already in zenlog.");
    }
    Ok(())
}

pub fn fail_unless_in_zenlog(inv: &Invocation) -> Result<()> {
    inv.session()?;
    Ok(())
}
