//! Messages exchanged between helper invocations and the logger.
//!
//! Helpers write [`Message`]s to the logger-in pipe; the logger answers the
//! ones that carry a correlation token with a [`Reply`] on the logger-out
//! pipe. Both travel as text lines (see [`crate::codec`]).

use crate::codec::{decode_line, encode_line};
use crate::error::{ZenlogError, ZenlogResult};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Version of the logger/helper protocol. Bump on any wire change.
pub const PROTOCOL_VERSION: u32 = 2;

/// How long a helper waits for a reply by default.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

pub const START_COMMAND: &str = "start-command";
pub const END_COMMAND: &str = "end-command";
pub const STOP_LOG: &str = "stop-log";
pub const FLUSH: &str = "flush";
pub const CLOSE: &str = "close";
pub const CHILD_DIED: &str = "child-died";
pub const WRITE: &str = "write";
pub const QUERY_LOGS: &str = "query-logs";

pub const STARTED: &str = "started";
pub const ENDED: &str = "ended";
pub const LOGS: &str = "logs";

/// Payload of a start-command message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartRequest {
    /// The command line as typed.
    pub command: String,
    pub started_at: DateTime<Local>,
    /// Environment of the helper invocation, which mirrors the shell's.
    pub env: BTreeMap<String, String>,
}

/// Generate a fresh correlation token.
pub fn new_token() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Anything that maps to and from a list of wire fields.
pub trait WireMessage: Sized {
    fn to_fields(&self) -> ZenlogResult<Vec<String>>;

    fn from_fields(fields: Vec<String>) -> ZenlogResult<Self>;

    fn encode(&self) -> ZenlogResult<String> {
        encode_line(&self.to_fields()?)
    }

    fn decode(line: &str) -> ZenlogResult<Self> {
        Self::from_fields(decode_line(line)?)
    }
}

/// Helper → logger.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    StartCommand { token: String, request: StartRequest },
    EndCommand { token: String },
    Flush,
    Close,
    /// Sent by the controller after the last output batch of the shell.
    ChildDied,
    /// Bytes to append to the open command's logs only. Hex on the wire.
    Write { data: Vec<u8> },
    QueryLogs { token: String },
}

/// Logger → helper.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Files are open; carries the sanitized log path.
    Started { token: String, san_path: String },
    /// Files are closed; `None` when no command was open.
    Ended { token: String, san_path: Option<String> },
    Logs {
        token: String,
        current: Option<String>,
        last: Option<String>,
    },
}

impl Reply {
    pub fn token(&self) -> &str {
        match self {
            Reply::Started { token, .. } | Reply::Ended { token, .. } | Reply::Logs { token, .. } => {
                token
            }
        }
    }
}

fn opt_field(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn field_opt(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

fn expect_fields(fields: Vec<String>, n: usize) -> ZenlogResult<Vec<String>> {
    if fields.len() != n {
        return Err(ZenlogError::InvalidMessage(format!(
            "'{}' expects {} field(s), got {}",
            fields[0],
            n - 1,
            fields.len() - 1
        )));
    }
    Ok(fields)
}

impl WireMessage for Message {
    fn to_fields(&self) -> ZenlogResult<Vec<String>> {
        Ok(match self {
            Message::StartCommand { token, request } => vec![
                START_COMMAND.into(),
                token.clone(),
                serde_json::to_string(request)?,
            ],
            Message::EndCommand { token } => vec![END_COMMAND.into(), token.clone()],
            Message::Flush => vec![FLUSH.into()],
            Message::Close => vec![CLOSE.into()],
            Message::ChildDied => vec![CHILD_DIED.into()],
            Message::Write { data } => vec![WRITE.into(), hex::encode(data)],
            Message::QueryLogs { token } => vec![QUERY_LOGS.into(), token.clone()],
        })
    }

    fn from_fields(fields: Vec<String>) -> ZenlogResult<Self> {
        let Some(keyword) = fields.first() else {
            return Err(ZenlogError::InvalidMessage("empty message".into()));
        };
        match keyword.as_str() {
            START_COMMAND => {
                let mut f = expect_fields(fields, 3)?.into_iter().skip(1);
                let token = f.next().unwrap_or_default();
                let request = serde_json::from_str(&f.next().unwrap_or_default())?;
                Ok(Message::StartCommand { token, request })
            }
            END_COMMAND | STOP_LOG => {
                let f = expect_fields(fields, 2)?;
                Ok(Message::EndCommand {
                    token: f[1].clone(),
                })
            }
            FLUSH => expect_fields(fields, 1).map(|_| Message::Flush),
            CLOSE => expect_fields(fields, 1).map(|_| Message::Close),
            CHILD_DIED => expect_fields(fields, 1).map(|_| Message::ChildDied),
            WRITE => {
                let f = expect_fields(fields, 2)?;
                let data = hex::decode(&f[1])
                    .map_err(|e| ZenlogError::InvalidMessage(format!("bad write payload: {e}")))?;
                Ok(Message::Write { data })
            }
            QUERY_LOGS => {
                let f = expect_fields(fields, 2)?;
                Ok(Message::QueryLogs {
                    token: f[1].clone(),
                })
            }
            other => Err(ZenlogError::InvalidMessage(format!(
                "unknown keyword '{other}'"
            ))),
        }
    }
}

impl WireMessage for Reply {
    fn to_fields(&self) -> ZenlogResult<Vec<String>> {
        Ok(match self {
            Reply::Started { token, san_path } => {
                vec![STARTED.into(), token.clone(), san_path.clone()]
            }
            Reply::Ended { token, san_path } => {
                vec![ENDED.into(), token.clone(), opt_field(san_path)]
            }
            Reply::Logs {
                token,
                current,
                last,
            } => vec![
                LOGS.into(),
                token.clone(),
                opt_field(current),
                opt_field(last),
            ],
        })
    }

    fn from_fields(fields: Vec<String>) -> ZenlogResult<Self> {
        let Some(keyword) = fields.first() else {
            return Err(ZenlogError::InvalidMessage("empty reply".into()));
        };
        match keyword.as_str() {
            STARTED => {
                let f = expect_fields(fields, 3)?;
                Ok(Reply::Started {
                    token: f[1].clone(),
                    san_path: f[2].clone(),
                })
            }
            ENDED => {
                let mut f = expect_fields(fields, 3)?;
                let san_path = field_opt(f.pop().unwrap_or_default());
                Ok(Reply::Ended {
                    token: f[1].clone(),
                    san_path,
                })
            }
            LOGS => {
                let mut f = expect_fields(fields, 4)?;
                let last = field_opt(f.pop().unwrap_or_default());
                let current = field_opt(f.pop().unwrap_or_default());
                Ok(Reply::Logs {
                    token: f[1].clone(),
                    current,
                    last,
                })
            }
            other => Err(ZenlogError::InvalidMessage(format!(
                "unknown reply '{other}'"
            ))),
        }
    }
}
