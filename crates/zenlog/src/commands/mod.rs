//! Helper subcommands, run from inside (or outside) a session.

pub mod history;
pub mod info;
pub mod lifecycle;
pub mod membership;
pub mod stream;

use crate::config::Config;
use crate::terminal;
use zenlog_core::session::member_context;
use zenlog_core::signature::resolve_current_exe;
use zenlog_core::{LocalIdentity, SessionContext, ZenlogError};

/// What a helper invocation knows about its surroundings, computed once.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub config: Config,
    /// The session this process belongs to, if membership holds.
    session: Option<SessionContext>,
}

impl Invocation {
    pub fn new(config: Config, session: Option<SessionContext>) -> Self {
        Self { config, session }
    }

    /// Compare the exported session values against this process's own
    /// binary, protocol version and terminal.
    pub fn detect(config: Config) -> Self {
        let exported = SessionContext::from_env(utf8_env());
        let session = match resolve_current_exe() {
            Ok(exe) => {
                let local = LocalIdentity::new(exe, terminal::controlling_tty());
                member_context(exported.as_ref(), &local)
            }
            Err(_) => None,
        };
        Self::new(config, session)
    }

    pub fn in_zenlog(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Result<&SessionContext, ZenlogError> {
        self.session.as_ref().ok_or(ZenlogError::NotInSession)
    }
}

/// The process environment, minus entries that are not valid UTF-8.
pub fn utf8_env() -> impl Iterator<Item = (String, String)> {
    std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outside_a_session_nothing_is_available() {
        let dir = tempfile::tempdir().unwrap();
        let inv = Invocation::new(test_support::config(dir.path()), None);
        assert!(!inv.in_zenlog());
        assert!(matches!(inv.session(), Err(ZenlogError::NotInSession)));
    }

    #[test]
    fn member_invocation_exposes_the_context() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_support::context(dir.path(), 5);
        let inv = Invocation::new(test_support::config(dir.path()), Some(ctx.clone()));
        assert!(inv.in_zenlog());
        assert_eq!(inv.session().unwrap(), &ctx);
    }
}
