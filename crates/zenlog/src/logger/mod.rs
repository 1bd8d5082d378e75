//! The logger task: consumes pty output and helper requests in one
//! ordered stream and drives the [`Segmenter`].

pub mod segmenter;

pub use segmenter::{Segmenter, Step};

use crate::transport::ReplyWriter;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use zenlog_core::codec::LineDecoder;
use zenlog_core::{Message, Reply, WireMessage, ZenlogResult};

/// One item on the logger's inbox.
#[derive(Debug)]
pub enum LoggerInput {
    /// A batch of bytes read from the pty master.
    Output(Vec<u8>),
    Control(Message),
}

/// Destination for replies to helpers.
pub trait ReplySink {
    fn send(&self, reply: &Reply) -> ZenlogResult<()>;
}

impl ReplySink for ReplyWriter {
    fn send(&self, reply: &Reply) -> ZenlogResult<()> {
        ReplyWriter::send(self, reply)
    }
}

impl ReplySink for mpsc::UnboundedSender<Reply> {
    fn send(&self, reply: &Reply) -> ZenlogResult<()> {
        // A gone receiver means nobody is waiting for the reply.
        let _ = mpsc::UnboundedSender::send(self, reply.clone());
        Ok(())
    }
}

/// Decode request lines from the `logger-in` pipe onto the inbox.
///
/// Runs until the inbox is closed. Malformed lines are logged and skipped,
/// and so is `child-died`, which only the controller may send.
pub async fn forward_requests(
    mut requests: pipe::Receiver,
    inbox: mpsc::Sender<LoggerInput>,
) -> ZenlogResult<()> {
    let mut decoder = LineDecoder::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let n = requests.read(&mut buf).await?;
        if n == 0 {
            // The logger holds a write end, so this only happens on teardown.
            debug!("request pipe closed");
            return Ok(());
        }
        for line in decoder.feed(&buf[..n]) {
            match Message::decode(&line) {
                Ok(Message::ChildDied) => warn!("ignoring child-died from a helper"),
                Ok(message) => {
                    if inbox.send(LoggerInput::Control(message)).await.is_err() {
                        return Ok(());
                    }
                }
                Err(e) => warn!(error = %e, line = %line, "ignoring malformed request"),
            }
        }
    }
}

/// Run the segmenter until child death, a close request or the inbox closing.
///
/// Whatever command is open when the loop ends is closed.
pub async fn run<R: ReplySink>(
    mut segmenter: Segmenter,
    mut inbox: mpsc::Receiver<LoggerInput>,
    replies: R,
) -> ZenlogResult<()> {
    info!("logger started");
    while let Some(input) = inbox.recv().await {
        match input {
            LoggerInput::Output(bytes) => segmenter.append(&bytes)?,
            LoggerInput::Control(message) => {
                debug!(?message, "control message");
                match segmenter.handle(message)? {
                    Step::Continue(Some(reply)) => replies.send(&reply)?,
                    Step::Continue(None) => {}
                    Step::Stop => break,
                }
            }
        }
    }
    segmenter.shutdown()?;
    info!("logger stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{LoggerClient, SessionPipes};
    use chrono::Local;
    use std::collections::BTreeMap;
    use zenlog_core::logfiles::list_commands;
    use zenlog_core::{LogKind, LogStore, StartRequest};

    fn start(token: &str, command: &str) -> LoggerInput {
        LoggerInput::Control(Message::StartCommand {
            token: token.into(),
            request: StartRequest {
                command: command.into(),
                started_at: Local::now(),
                env: BTreeMap::new(),
            },
        })
    }

    #[tokio::test]
    async fn output_and_control_keep_their_order() {
        let dir = tempfile::tempdir().unwrap();
        let segmenter = Segmenter::new(LogStore::new(dir.path().to_path_buf(), 7));
        let (tx, rx) = mpsc::channel(16);
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
        let logger = tokio::spawn(run(segmenter, rx, reply_tx));

        tx.send(LoggerInput::Output(b"before\n".to_vec())).await.unwrap();
        tx.send(start("s", "cat notes")).await.unwrap();
        tx.send(LoggerInput::Output(b"inside\n".to_vec())).await.unwrap();
        tx.send(LoggerInput::Control(Message::EndCommand { token: "e".into() }))
            .await
            .unwrap();
        tx.send(LoggerInput::Output(b"after\n".to_vec())).await.unwrap();
        tx.send(LoggerInput::Control(Message::ChildDied)).await.unwrap();
        logger.await.unwrap().unwrap();

        let Some(Reply::Started { san_path, .. }) = reply_rx.recv().await else {
            panic!("expected started");
        };
        let Some(Reply::Ended { san_path: ended, .. }) = reply_rx.recv().await else {
            panic!("expected ended");
        };
        assert_eq!(ended.as_deref(), Some(san_path.as_str()));
        assert_eq!(std::fs::read_to_string(&san_path).unwrap(), "$ cat notes\ninside\n");
    }

    #[tokio::test]
    async fn dropping_the_inbox_closes_the_open_command() {
        let dir = tempfile::tempdir().unwrap();
        let segmenter = Segmenter::new(LogStore::new(dir.path().to_path_buf(), 7));
        let (tx, rx) = mpsc::channel(16);
        let (reply_tx, _reply_rx) = mpsc::unbounded_channel();
        let logger = tokio::spawn(run(segmenter, rx, reply_tx));

        tx.send(start("s", "tail -f log")).await.unwrap();
        tx.send(LoggerInput::Output(b"line\n".to_vec())).await.unwrap();
        drop(tx);
        logger.await.unwrap().unwrap();

        let listed = list_commands(dir.path(), LogKind::Raw).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(std::fs::read(&listed[0].path).unwrap(), b"line\n");
    }

    #[tokio::test]
    async fn helpers_reach_the_logger_through_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let pipes = SessionPipes::create(&dir.path().join("run")).unwrap();
        let (requests, replies) = pipes.open_logger_end().unwrap();
        let segmenter = Segmenter::new(LogStore::new(dir.path().join("logs"), 7));
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(forward_requests(requests, tx.clone()));
        let logger = tokio::spawn(run(segmenter, rx, replies));

        let client = LoggerClient::with_paths(pipes.logger_in.clone(), pipes.logger_out.clone());
        let reply = client
            .request(&Message::QueryLogs { token: "q1".into() }, "q1")
            .await
            .unwrap();
        assert_eq!(reply, Reply::Logs { token: "q1".into(), current: None, last: None });

        client.send(&Message::Close).await.unwrap();
        logger.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn helpers_cannot_report_child_death() {
        let dir = tempfile::tempdir().unwrap();
        let pipes = SessionPipes::create(&dir.path().join("run")).unwrap();
        let (requests, replies) = pipes.open_logger_end().unwrap();
        let segmenter = Segmenter::new(LogStore::new(dir.path().join("logs"), 7));
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(forward_requests(requests, tx.clone()));
        let logger = tokio::spawn(run(segmenter, rx, replies));

        let client = LoggerClient::with_paths(pipes.logger_in.clone(), pipes.logger_out.clone());
        client.send(&Message::ChildDied).await.unwrap();
        let reply = client
            .request(&Message::QueryLogs { token: "q2".into() }, "q2")
            .await
            .unwrap();
        assert_eq!(reply, Reply::Logs { token: "q2".into(), current: None, last: None });
        assert!(!logger.is_finished());

        tx.send(LoggerInput::Control(Message::ChildDied)).await.unwrap();
        logger.await.unwrap().unwrap();
    }
}
