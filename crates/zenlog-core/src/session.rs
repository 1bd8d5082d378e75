//! The session context shared by the controller and helper invocations.
//!
//! The controller builds one [`SessionContext`] at startup and exports it
//! into the shell's environment. Every helper invocation rebuilds the same
//! value from its inherited environment exactly once, then passes it down
//! explicitly.

use crate::signature::LocalIdentity;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::path::PathBuf;

pub const ZENLOG_SIGNATURE: &str = "ZENLOG_SIGNATURE";
pub const ZENLOG_LOGGER_IN: &str = "ZENLOG_LOGGER_IN";
pub const ZENLOG_LOGGER_OUT: &str = "ZENLOG_LOGGER_OUT";
pub const ZENLOG_OUTER_TTY: &str = "ZENLOG_OUTER_TTY";
pub const ZENLOG_BIN_CTIME: &str = "ZENLOG_BIN_CTIME";
pub const ZENLOG_TTY: &str = "ZENLOG_TTY";
pub const ZENLOG_PID: &str = "ZENLOG_PID";
pub const ZENLOG_START_TIME: &str = "ZENLOG_START_TIME";
pub const ZENLOG_DIR: &str = "ZENLOG_DIR";
pub const ZENLOG_BIN: &str = "ZENLOG_BIN";

/// Everything a helper needs to talk to the logger of its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    /// Membership value: `<pty slave>:<signature>`.
    pub signature: String,
    /// Helper → logger pipe.
    pub logger_in: PathBuf,
    /// Logger → helper pipe.
    pub logger_out: PathBuf,
    /// The terminal the user is typing into.
    pub outer_tty: String,
    /// Change time of the controller binary at session start.
    pub bin_ctime: i64,
    /// The pty slave the shell runs on.
    pub tty: String,
    /// Controller pid; also embedded in log filenames.
    pub session_id: u32,
    /// When the controller started; with `session_id` identifies the session.
    pub started_at: DateTime<Utc>,
    pub log_dir: PathBuf,
    pub bin: PathBuf,
}

impl SessionContext {
    /// Rebuild a context from environment variables.
    ///
    /// Returns `None` when any variable is missing or malformed, which is
    /// what a process outside any session sees.
    pub fn from_env<I>(vars: I) -> Option<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut env: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with("ZENLOG_"))
            .collect();
        let mut take = |key: &str| env.remove(key).filter(|v| !v.is_empty());

        Some(Self {
            signature: take(ZENLOG_SIGNATURE)?,
            logger_in: take(ZENLOG_LOGGER_IN)?.into(),
            logger_out: take(ZENLOG_LOGGER_OUT)?.into(),
            outer_tty: take(ZENLOG_OUTER_TTY)?,
            bin_ctime: take(ZENLOG_BIN_CTIME)?.parse().ok()?,
            tty: take(ZENLOG_TTY)?,
            session_id: take(ZENLOG_PID)?.parse().ok()?,
            started_at: Utc
                .timestamp_millis_opt(take(ZENLOG_START_TIME)?.parse().ok()?)
                .single()?,
            log_dir: take(ZENLOG_DIR)?.into(),
            bin: take(ZENLOG_BIN)?.into(),
        })
    }

    /// Variables to inject into the shell's environment.
    pub fn exports(&self) -> Vec<(&'static str, String)> {
        vec![
            (ZENLOG_SIGNATURE, self.signature.clone()),
            (ZENLOG_LOGGER_IN, self.logger_in.display().to_string()),
            (ZENLOG_LOGGER_OUT, self.logger_out.display().to_string()),
            (ZENLOG_OUTER_TTY, self.outer_tty.clone()),
            (ZENLOG_BIN_CTIME, self.bin_ctime.to_string()),
            (ZENLOG_TTY, self.tty.clone()),
            (ZENLOG_PID, self.session_id.to_string()),
            (ZENLOG_START_TIME, self.started_at.timestamp_millis().to_string()),
            (ZENLOG_DIR, self.log_dir.display().to_string()),
            (ZENLOG_BIN, self.bin.display().to_string()),
        ]
    }

    /// True iff `local` runs the same binary and protocol on the same tty.
    pub fn contains(&self, local: &LocalIdentity) -> bool {
        local.membership_token().as_deref() == Some(self.signature.as_str())
    }

    /// True when the binary on disk is not the one that started the session.
    pub fn binary_updated(&self, current_ctime: i64) -> bool {
        current_ctime != self.bin_ctime
    }
}

/// Convenience: the context of the current process, if it is in a session
/// and is a member of it.
pub fn member_context(
    ctx: Option<&SessionContext>,
    local: &LocalIdentity,
) -> Option<SessionContext> {
    ctx.filter(|c| c.contains(local)).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::membership_token;

    fn ctx() -> SessionContext {
        SessionContext {
            signature: membership_token("/dev/pts/7", "/opt/zenlog:[1]"),
            logger_in: "/tmp/zenlog/42/logger-in".into(),
            logger_out: "/tmp/zenlog/42/logger-out".into(),
            outer_tty: "/dev/pts/1".into(),
            bin_ctime: 1_700_000_000,
            tty: "/dev/pts/7".into(),
            session_id: 42,
            started_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
            log_dir: "/home/me/zenlog".into(),
            bin: "/opt/zenlog".into(),
        }
    }

    fn exported(c: &SessionContext) -> Vec<(String, String)> {
        c.exports()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn exports_rebuild_the_same_context() {
        let c = ctx();
        let mut vars = exported(&c);
        vars.push(("HOME".into(), "/home/me".into()));
        assert_eq!(SessionContext::from_env(vars), Some(c));
    }

    #[test]
    fn missing_variable_means_no_session() {
        let vars: Vec<_> = exported(&ctx())
            .into_iter()
            .filter(|(k, _)| k != ZENLOG_LOGGER_OUT)
            .collect();
        assert_eq!(SessionContext::from_env(vars), None);
    }

    #[test]
    fn membership_requires_every_field_to_match() {
        let c = ctx();
        let me = LocalIdentity::new("/opt/zenlog".into(), Some("/dev/pts/7".into()));
        assert!(c.contains(&me));

        let other_tty = LocalIdentity::new("/opt/zenlog".into(), Some("/dev/pts/8".into()));
        assert!(!c.contains(&other_tty));

        let other_bin = LocalIdentity::new("/usr/local/bin/zenlog".into(), Some("/dev/pts/7".into()));
        assert!(!c.contains(&other_bin));

        let mut newer = me.clone();
        newer.protocol_version += 1;
        assert!(!c.contains(&newer));

        let no_tty = LocalIdentity::new("/opt/zenlog".into(), None);
        assert!(!c.contains(&no_tty));

        assert_eq!(member_context(Some(&c), &me), Some(c.clone()));
        assert_eq!(member_context(Some(&c), &other_tty), None);
        assert_eq!(member_context(None, &me), None);
    }

    #[test]
    fn binary_update_is_a_ctime_mismatch() {
        let c = ctx();
        assert!(!c.binary_updated(1_700_000_000));
        assert!(c.binary_updated(1_700_000_123));
    }
}
