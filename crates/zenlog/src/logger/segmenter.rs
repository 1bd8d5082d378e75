//! Command-boundary state machine.
//!
//! Turns the continuous output stream plus control messages into one
//! raw/sanitized/env triple per command.
//!
//! | state          | message               | effect                                   |
//! |----------------|-----------------------|------------------------------------------|
//! | Idle           | start-command         | create files, write env, → CommandRunning |
//! | CommandRunning | start-command         | close stale command, open new one        |
//! | CommandRunning | end-command           | close files, → Idle                      |
//! | Idle           | end-command           | no-op                                    |
//! | any            | flush                 | flush open files                         |
//! | any            | child-died / close    | close open files, stop                   |

use tracing::{debug, info, trace, warn};
use zenlog_core::{
    LogPaths, LogStore, Message, OpenCommand, Reply, Sanitizer, StartRequest, ZenlogResult,
};

enum State {
    Idle,
    CommandRunning(OpenCommand),
}

/// What the logger loop should do after a message.
#[derive(Debug, PartialEq)]
pub enum Step {
    Continue(Option<Reply>),
    Stop,
}

pub struct Segmenter {
    store: LogStore,
    sanitizer: Sanitizer,
    state: State,
    last: Option<LogPaths>,
    scratch: Vec<u8>,
}

impl Segmenter {
    pub fn new(store: LogStore) -> Self {
        Self {
            store,
            sanitizer: Sanitizer::new(),
            state: State::Idle,
            last: None,
            scratch: Vec::new(),
        }
    }

    /// Paths of the command currently being recorded.
    pub fn current(&self) -> Option<&LogPaths> {
        match &self.state {
            State::CommandRunning(open) => Some(open.paths()),
            State::Idle => None,
        }
    }

    /// Paths of the most recently closed command.
    pub fn last(&self) -> Option<&LogPaths> {
        self.last.as_ref()
    }

    /// Attribute one output batch to the open command, if any.
    pub fn append(&mut self, bytes: &[u8]) -> ZenlogResult<()> {
        let State::CommandRunning(open) = &mut self.state else {
            trace!(len = bytes.len(), "discarding output outside of a command");
            return Ok(());
        };
        self.scratch.clear();
        self.sanitizer.feed(bytes, &mut self.scratch);
        open.append(bytes, &self.scratch)
    }

    pub fn handle(&mut self, message: Message) -> ZenlogResult<Step> {
        match message {
            Message::StartCommand { token, request } => {
                let san_path = self.start(&request)?;
                Ok(Step::Continue(Some(Reply::Started { token, san_path })))
            }
            Message::EndCommand { token } => {
                let closed = self.close_current()?;
                if closed.is_none() {
                    debug!("end-command while idle, ignoring");
                }
                Ok(Step::Continue(Some(Reply::Ended {
                    token,
                    san_path: closed.map(|p| p.san.display().to_string()),
                })))
            }
            Message::Flush => {
                if let State::CommandRunning(open) = &mut self.state {
                    open.flush()?;
                }
                Ok(Step::Continue(None))
            }
            Message::Write { data } => {
                self.append(&data)?;
                Ok(Step::Continue(None))
            }
            Message::QueryLogs { token } => Ok(Step::Continue(Some(Reply::Logs {
                token,
                current: self.current().map(|p| p.san.display().to_string()),
                last: self.last().map(|p| p.san.display().to_string()),
            }))),
            Message::ChildDied => {
                info!("child died, closing logs");
                self.shutdown()?;
                Ok(Step::Stop)
            }
            Message::Close => {
                info!("close requested");
                self.shutdown()?;
                Ok(Step::Stop)
            }
        }
    }

    /// Close whatever is open. Safe to call repeatedly.
    pub fn shutdown(&mut self) -> ZenlogResult<()> {
        self.close_current()?;
        Ok(())
    }

    fn start(&mut self, request: &StartRequest) -> ZenlogResult<String> {
        if let Some(stale) = self.close_current()? {
            warn!(
                path = %stale.san.display(),
                "start-command while a command was running, closed the stale command"
            );
        }
        let open = self.store.create(request)?;
        let san_path = open.paths().san.display().to_string();
        info!(path = %san_path, command = %request.command, "command started");
        self.sanitizer.reset();
        self.state = State::CommandRunning(open);
        Ok(san_path)
    }

    fn close_current(&mut self) -> ZenlogResult<Option<LogPaths>> {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Idle => Ok(None),
            State::CommandRunning(open) => {
                let paths = open.close()?;
                self.last = Some(paths.clone());
                Ok(Some(paths))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::Path;
    use zenlog_core::logfiles::{list_commands, EnvRecord};
    use zenlog_core::sanitize::sanitize;
    use zenlog_core::LogKind;

    fn segmenter(dir: &Path) -> Segmenter {
        Segmenter::new(LogStore::new(dir.to_path_buf(), 4242))
    }

    fn start(token: &str, command: &str, ms: i64) -> Message {
        Message::StartCommand {
            token: token.into(),
            request: StartRequest {
                command: command.into(),
                started_at: Local.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap(),
                env: BTreeMap::from([("PWD".to_string(), "/home".to_string())]),
            },
        }
    }

    fn end(token: &str) -> Message {
        Message::EndCommand { token: token.into() }
    }

    fn started_path(step: Step) -> String {
        match step {
            Step::Continue(Some(Reply::Started { san_path, .. })) => san_path,
            other => panic!("expected started reply, got {other:?}"),
        }
    }

    #[test]
    fn scenario_ls() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = segmenter(dir.path());

        let san = started_path(seg.handle(start("t1", "ls", 0)).unwrap());
        assert!(seg.current().is_some());
        seg.append(b"a.txt\nb.txt\n").unwrap();
        let step = seg.handle(end("t2")).unwrap();
        assert_eq!(
            step,
            Step::Continue(Some(Reply::Ended { token: "t2".into(), san_path: Some(san.clone()) }))
        );
        assert!(seg.current().is_none());

        let paths = LogPaths::from_san(dir.path(), Path::new(&san)).unwrap();
        assert_eq!(fs::read(&paths.raw).unwrap(), b"a.txt\nb.txt\n");
        assert_eq!(fs::read(&paths.san).unwrap(), b"$ ls\na.txt\nb.txt\n");
        let env: EnvRecord = serde_json::from_slice(&fs::read(&paths.env).unwrap()).unwrap();
        assert_eq!(env.command, "ls");

        let listed = list_commands(dir.path(), LogKind::San).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].path, paths.san);
        assert_eq!(listed[0].summary, "ls");
    }

    #[test]
    fn raw_is_exact_and_sanitized_drops_only_escapes() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = segmenter(dir.path());
        let chunks: [&[u8]; 4] = [
            b"\x1b[01;3",
            b"4mdir\x1b[0m\r\n\x1b]0;ti",
            b"tle\x07plain \xe6\x97\xa5\n",
            b"\x1b[K",
        ];

        let san = started_path(seg.handle(start("t", "ls --color", 0)).unwrap());
        for chunk in chunks {
            seg.append(chunk).unwrap();
        }
        seg.handle(end("e")).unwrap();

        let whole: Vec<u8> = chunks.concat();
        let paths = LogPaths::from_san(dir.path(), Path::new(&san)).unwrap();
        assert_eq!(fs::read(&paths.raw).unwrap(), whole);

        let mut expected = b"$ ls --color\n".to_vec();
        expected.extend(sanitize(&whole));
        assert_eq!(fs::read(&paths.san).unwrap(), expected);
        assert!(String::from_utf8(expected).unwrap().ends_with("dir\r\nplain 日\n"));
    }

    #[test]
    fn output_while_idle_is_not_attributed() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = segmenter(dir.path());

        seg.append(b"prompt$ ").unwrap();
        let san = started_path(seg.handle(start("t", "echo hi", 0)).unwrap());
        seg.append(b"hi\n").unwrap();
        seg.handle(end("e")).unwrap();
        seg.append(b"prompt$ ").unwrap();

        let paths = LogPaths::from_san(dir.path(), Path::new(&san)).unwrap();
        assert_eq!(fs::read(&paths.raw).unwrap(), b"hi\n");
    }

    #[test]
    fn commands_map_one_to_one_onto_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = segmenter(dir.path());

        for (i, cmd) in ["ls", "pwd", "date"].iter().enumerate() {
            seg.handle(start("s", cmd, i as i64 * 10)).unwrap();
            seg.append(format!("out of {cmd}\n").as_bytes()).unwrap();
            seg.handle(end("e")).unwrap();
        }

        let listed = list_commands(dir.path(), LogKind::San).unwrap();
        let summaries: Vec<_> = listed.iter().map(|e| e.summary.as_str()).collect();
        assert_eq!(summaries, vec!["ls", "pwd", "date"]);

        let transcript: String = listed
            .iter()
            .map(|e| fs::read_to_string(&e.path).unwrap())
            .collect();
        assert_eq!(
            transcript,
            "$ ls\nout of ls\n$ pwd\nout of pwd\n$ date\nout of date\n"
        );
        assert_eq!(list_commands(dir.path(), LogKind::Raw).unwrap().len(), 3);
        assert_eq!(list_commands(dir.path(), LogKind::Env).unwrap().len(), 3);
    }

    #[test]
    fn duplicate_end_command_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = segmenter(dir.path());

        let san = started_path(seg.handle(start("t", "ls", 0)).unwrap());
        seg.append(b"x\n").unwrap();
        seg.handle(end("e1")).unwrap();
        let again = seg.handle(end("e2")).unwrap();
        assert_eq!(
            again,
            Step::Continue(Some(Reply::Ended { token: "e2".into(), san_path: None }))
        );
        assert!(seg.current().is_none());
        assert_eq!(seg.last().map(|p| p.san.display().to_string()), Some(san.clone()));

        seg.append(b"late\n").unwrap();
        let paths = LogPaths::from_san(dir.path(), Path::new(&san)).unwrap();
        assert_eq!(fs::read(&paths.raw).unwrap(), b"x\n");
    }

    #[test]
    fn start_while_running_closes_the_stale_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = segmenter(dir.path());

        let first = started_path(seg.handle(start("a", "sleep 1", 0)).unwrap());
        seg.append(b"one\n").unwrap();
        let second = started_path(seg.handle(start("b", "ls", 1)).unwrap());
        seg.append(b"two\n").unwrap();

        assert_ne!(first, second);
        assert_eq!(seg.last().map(|p| p.san.display().to_string()), Some(first.clone()));
        assert_eq!(seg.current().map(|p| p.san.display().to_string()), Some(second));
        seg.handle(end("e")).unwrap();

        let first = LogPaths::from_san(dir.path(), Path::new(&first)).unwrap();
        assert_eq!(fs::read(&first.raw).unwrap(), b"one\n");
    }

    #[test]
    fn query_reports_current_and_last() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = segmenter(dir.path());

        let step = seg.handle(Message::QueryLogs { token: "q".into() }).unwrap();
        assert_eq!(
            step,
            Step::Continue(Some(Reply::Logs { token: "q".into(), current: None, last: None }))
        );

        let a = started_path(seg.handle(start("t", "a", 0)).unwrap());
        seg.handle(end("e")).unwrap();
        let b = started_path(seg.handle(start("t", "b", 1)).unwrap());
        let step = seg.handle(Message::QueryLogs { token: "q".into() }).unwrap();
        assert_eq!(
            step,
            Step::Continue(Some(Reply::Logs { token: "q".into(), current: Some(b), last: Some(a) }))
        );
    }

    #[test]
    fn write_flush_and_child_death() {
        let dir = tempfile::tempdir().unwrap();
        let mut seg = segmenter(dir.path());

        let san = started_path(seg.handle(start("t", "make", 0)).unwrap());
        seg.append(b"building\n").unwrap();
        seg.handle(Message::Write { data: b"note \xff\n".to_vec() }).unwrap();
        assert_eq!(seg.handle(Message::Flush).unwrap(), Step::Continue(None));

        let paths = LogPaths::from_san(dir.path(), Path::new(&san)).unwrap();
        assert_eq!(fs::read(&paths.raw).unwrap(), b"building\nnote \xff\n");

        assert_eq!(seg.handle(Message::ChildDied).unwrap(), Step::Stop);
        assert!(seg.current().is_none());
        assert_eq!(seg.handle(Message::Close).unwrap(), Step::Stop);
    }
}
