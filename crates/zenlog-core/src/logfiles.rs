//! On-disk layout of per-command logs.
//!
//! ```text
//! <log dir>/RAW/YYYY/MM/DD/HH-MM-SS.mmm-PPPPP-SSSSSS_<exe>.log   byte-exact output
//! <log dir>/SAN/...same relative path...                         escape sequences removed
//! <log dir>/ENV/...same relative path...                         command, time, environment
//! ```
//!
//! Dates and times in names are UTC, so names sort in time order across
//! daylight saving changes. `PPPPP` is the session id and `SSSSSS` a
//! per-session sequence number.

use crate::error::{ZenlogError, ZenlogResult};
use crate::protocol::StartRequest;
use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

pub const RAW_DIR: &str = "RAW";
pub const SAN_DIR: &str = "SAN";
pub const ENV_DIR: &str = "ENV";

/// First-line marker of a sanitized log.
pub const COMMAND_MARKER: &str = "$";

const MAX_SUFFIX_LEN: usize = 48;

/// Length of the `YYYY/MM/DD/HH-MM-SS.mmm` prefix of a relative log path.
const STAMP_LEN: usize = 23;

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y/%m/%d/%H-%M-%S%.3f").to_string()
}

/// Which of the three parallel trees a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Raw,
    San,
    Env,
}

impl LogKind {
    pub fn dir_name(self) -> &'static str {
        match self {
            LogKind::Raw => RAW_DIR,
            LogKind::San => SAN_DIR,
            LogKind::Env => ENV_DIR,
        }
    }
}

/// A command line and the executables it names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub command_line: String,
    pub exe_names: Vec<String>,
}

impl Command {
    /// Split a command line into pipeline/list segments and pick the
    /// executable of each, skipping leading `NAME=value` assignments.
    pub fn parse(command_line: &str) -> Self {
        let exe_names = command_line
            .split(['|', ';', '&', '(', ')', '\n'])
            .filter_map(|segment| {
                segment
                    .split_whitespace()
                    .find(|word| !is_assignment(word))
                    .map(|word| {
                        let word = word.trim_matches(['"', '\'']);
                        word.rsplit('/').next().unwrap_or(word).to_string()
                    })
                    .filter(|name| !name.is_empty())
            })
            .collect();
        Self {
            command_line: command_line.trim().to_string(),
            exe_names,
        }
    }

    /// Filename-safe summary of the executables, e.g. `ls_grep`.
    pub fn filename_suffix(&self) -> String {
        let mut suffix: String = self
            .exe_names
            .join("_")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+'))
            .collect();
        suffix.truncate(MAX_SUFFIX_LEN);
        if suffix.is_empty() {
            suffix.push_str("none");
        }
        suffix
    }
}

fn is_assignment(word: &str) -> bool {
    match word.split_once('=') {
        Some((name, _)) => {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    }
}

/// The three files of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    pub raw: PathBuf,
    pub san: PathBuf,
    pub env: PathBuf,
}

impl LogPaths {
    /// Place a relative log path under each of the three roots.
    pub fn under(log_dir: &Path, relative: &Path) -> Self {
        Self {
            raw: log_dir.join(RAW_DIR).join(relative),
            san: log_dir.join(SAN_DIR).join(relative),
            env: log_dir.join(ENV_DIR).join(relative),
        }
    }

    /// Recover all three paths from a sanitized log path.
    pub fn from_san(log_dir: &Path, san: &Path) -> Option<Self> {
        let relative = san.strip_prefix(log_dir.join(SAN_DIR)).ok()?;
        Some(Self::under(log_dir, relative))
    }

    pub fn get(&self, kind: LogKind) -> &Path {
        match kind {
            LogKind::Raw => &self.raw,
            LogKind::San => &self.san,
            LogKind::Env => &self.env,
        }
    }
}

/// Hands out strictly increasing relative paths within one session.
#[derive(Debug)]
pub struct FilenameAllocator {
    session_id: u32,
    seq: u32,
    last: Option<DateTime<Utc>>,
}

impl FilenameAllocator {
    pub fn new(session_id: u32) -> Self {
        Self {
            session_id,
            seq: 0,
            last: None,
        }
    }

    /// Never hand out a name earlier than `at`.
    pub fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.last = Some(at - Duration::milliseconds(1));
        self
    }

    /// Next relative path. The timestamp never repeats or moves backwards
    /// at millisecond resolution, so coarse or stepped clocks still yield
    /// increasing names.
    pub fn next(&mut self, started_at: DateTime<Local>, command: &Command) -> PathBuf {
        let mut at = started_at.with_timezone(&Utc);
        if let Some(last) = self.last {
            let min = last + Duration::milliseconds(1);
            if at.timestamp_millis() < min.timestamp_millis() {
                at = min;
            }
        }
        self.last = Some(at);
        self.seq += 1;

        PathBuf::from(format!(
            "{}-{:05}-{:06}_{}.log",
            stamp(at),
            self.session_id,
            self.seq,
            command.filename_suffix()
        ))
    }
}

/// Extract the session id embedded in a log filename.
pub fn session_id_of(path: &Path) -> Option<u32> {
    let name = path.file_name()?.to_str()?;
    let stem = name.split('_').next()?;
    let mut parts = stem.rsplitn(3, '-');
    let _seq = parts.next()?;
    parts.next()?.parse().ok()
}

/// Contents of an environment log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvRecord {
    pub command: String,
    pub started_at: DateTime<Local>,
    pub env: BTreeMap<String, String>,
}

/// Raw and sanitized files of the command currently being recorded.
#[derive(Debug)]
pub struct OpenCommand {
    paths: LogPaths,
    raw: BufWriter<File>,
    san: BufWriter<File>,
}

impl OpenCommand {
    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }

    /// Append one batch: `raw` to the raw log, `san` to the sanitized log.
    pub fn append(&mut self, raw: &[u8], san: &[u8]) -> ZenlogResult<()> {
        self.raw.write_all(raw)?;
        self.san.write_all(san)?;
        Ok(())
    }

    /// Push buffered bytes to the kernel and ask it to persist them.
    pub fn flush(&mut self) -> ZenlogResult<()> {
        self.raw.flush()?;
        self.san.flush()?;
        self.raw.get_ref().sync_data()?;
        self.san.get_ref().sync_data()?;
        Ok(())
    }

    /// Flush and close both files.
    pub fn close(mut self) -> ZenlogResult<LogPaths> {
        self.raw.flush()?;
        self.san.flush()?;
        debug!(path = %self.paths.san.display(), "closed command logs");
        Ok(self.paths)
    }
}

/// Creates command logs under one log directory.
#[derive(Debug)]
pub struct LogStore {
    log_dir: PathBuf,
    allocator: FilenameAllocator,
}

impl LogStore {
    pub fn new(log_dir: PathBuf, session_id: u32) -> Self {
        Self {
            log_dir,
            allocator: FilenameAllocator::new(session_id),
        }
    }

    /// Name no command earlier than the session start.
    pub fn starting_at(mut self, at: DateTime<Utc>) -> Self {
        self.allocator = self.allocator.starting_at(at);
        self
    }

    /// Allocate the next filename, write and close the environment log,
    /// then open the raw and sanitized logs with the command header.
    pub fn create(&mut self, request: &StartRequest) -> ZenlogResult<OpenCommand> {
        let command = Command::parse(&request.command);
        let relative = self.allocator.next(request.started_at, &command);
        let paths = LogPaths::under(&self.log_dir, &relative);

        for path in [&paths.raw, &paths.san, &paths.env] {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }

        let record = EnvRecord {
            command: command.command_line.clone(),
            started_at: request.started_at,
            env: request.env.clone(),
        };
        let mut env = BufWriter::new(create_new(&paths.env)?);
        serde_json::to_writer_pretty(&mut env, &record)?;
        env.write_all(b"\n")?;
        env.into_inner()
            .map_err(|e| ZenlogError::Io(e.into_error()))?
            .sync_all()?;

        let raw = BufWriter::new(create_new(&paths.raw)?);
        let mut san = BufWriter::new(create_new(&paths.san)?);
        writeln!(san, "{} {}", COMMAND_MARKER, command.command_line)?;

        debug!(path = %paths.san.display(), command = %command.command_line, "opened command logs");
        Ok(OpenCommand { paths, raw, san })
    }
}

fn create_new(path: &Path) -> ZenlogResult<File> {
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|e| {
            ZenlogError::Io(std::io::Error::new(
                e.kind(),
                format!("{}: {e}", path.display()),
            ))
        })
}

/// One recorded command as seen by browsing tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEntry {
    /// Path in the requested tree.
    pub path: PathBuf,
    /// Command line from the sanitized log's first line.
    pub summary: String,
}

/// Strip the trailing newline, the leading marker and following spaces.
pub fn summary_line(first_line: &str) -> String {
    first_line
        .trim_end_matches(['\n', '\r'])
        .trim_start_matches(COMMAND_MARKER)
        .trim_start_matches(' ')
        .to_string()
}

/// Every command under `log_dir`, in filename (= chronological) order.
///
/// Walks the sanitized tree and maps each path to the `kind` tree.
/// Unreadable or empty files are skipped.
pub fn list_commands(log_dir: &Path, kind: LogKind) -> ZenlogResult<Vec<CommandEntry>> {
    let san_root = log_dir.join(SAN_DIR);
    if !san_root.is_dir() {
        debug!(path = %san_root.display(), "no sanitized logs yet");
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in WalkDir::new(&san_root).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "skipping unreadable log entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(summary) = read_first_line(entry.path()) else {
            continue;
        };
        let path = match kind {
            LogKind::San => entry.path().to_path_buf(),
            other => match LogPaths::from_san(log_dir, entry.path()) {
                Some(paths) => paths.get(other).to_path_buf(),
                None => continue,
            },
        };
        entries.push(CommandEntry {
            path,
            summary: summary_line(&summary),
        });
    }
    Ok(entries)
}

/// Commands recorded by one session.
///
/// Session ids are pids and get reused, so only logs named at or after the
/// session's start count.
pub fn session_commands(
    log_dir: &Path,
    session_id: u32,
    started_at: DateTime<Utc>,
    kind: LogKind,
) -> ZenlogResult<Vec<CommandEntry>> {
    let since = stamp(started_at);
    let root = log_dir.join(kind.dir_name());
    Ok(list_commands(log_dir, kind)?
        .into_iter()
        .filter(|e| session_id_of(&e.path) == Some(session_id))
        .filter(|e| {
            relative_stamp(&root, &e.path).is_some_and(|named| named >= since.as_str())
        })
        .collect())
}

fn relative_stamp<'a>(root: &Path, path: &'a Path) -> Option<&'a str> {
    path.strip_prefix(root).ok()?.to_str()?.get(..STAMP_LEN)
}

fn read_first_line(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut line = String::new();
    match BufReader::new(file).read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}
