//! zenlog: record every command of an interactive shell session.
//!
//! Without a subcommand, starts a session: the user's shell runs under a
//! pty and every command's output is written to its own raw, sanitized and
//! environment log files. Subcommands are the helpers the shell calls from
//! inside the session (prompt hooks, membership checks, browsing).

mod commands;
mod config;
mod logger;
mod session;
mod terminal;
mod transport;

use clap::{Args, Parser, Subcommand};
use commands::Invocation;
use config::Config;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::path::Path;
use tracing::error;
use tracing_subscriber::EnvFilter;
use zenlog_core::LogKind;

/// Exit status of the shell that asks for a fresh session.
const RESTART_STATUS: i32 = 13;
const EMERGENCY_SHELL: &str = "/bin/sh";
const LOG_ENV: &str = "ZENLOG_LOG";

/// zenlog: shell session logger
#[derive(Parser)]
#[command(name = "zenlog", version, about = "Records every command of a shell session into its own log files")]
struct Cli {
    /// Config file path (default ~/.zenlog.toml)
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Exit 0 if running inside a zenlog session, 1 otherwise
    InZenlog,

    /// Fail if running inside a zenlog session
    FailIfInZenlog,

    /// Fail unless running inside a zenlog session
    FailUnlessInZenlog,

    /// Copy stdin into the current command's logs only
    WriteToLogger,

    /// Copy stdin to the outer terminal without logging it
    WriteToOuter,

    /// Print the terminal the session was started from
    OuterTty,

    /// Print the logger's request pipe
    LoggerPipe,

    /// Print the path of the zenlog binary
    ZenlogBin,

    /// Print the temp directory
    TempDir,

    /// List the commands recorded in this session
    History(Selection),

    /// Print the log of the running command
    CurrentLog(Selection),

    /// Print the log of the last finished command
    LastLog(Selection),

    /// List every recorded command with its log path
    AllCommands(Selection),

    /// List every log path
    ListLogs(Selection),

    /// Fail with a hint if the binary changed since the session started
    CheckBinUpdate,

    /// Mark the start of a command (prompt hook)
    StartCommand {
        /// The command line about to run
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },

    /// Mark the end of the current command (prompt hook)
    #[command(alias = "stop-log")]
    EndCommand,

    /// Flush the open logs to disk
    Flush,
}

/// Which of the three log trees to print paths from.
#[derive(Args, Debug, Clone, Copy)]
struct Selection {
    /// Print RAW log paths
    #[arg(short = 'r', conflicts_with = "env")]
    raw: bool,

    /// Print ENV log paths
    #[arg(short = 'e')]
    env: bool,
}

impl Selection {
    fn kind(self) -> LogKind {
        match (self.raw, self.env) {
            (true, _) => LogKind::Raw,
            (_, true) => LogKind::Env,
            _ => LogKind::San,
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse_from(normalize_subcommand(std::env::args_os().collect()));
    let config = Config::load(cli.config.as_deref());

    let status = match cli.command {
        None => start_session(cli.verbose, config).await,
        Some(command) => {
            init_tracing(cli.verbose);
            let result = match config {
                Ok(config) => run_helper(command, Invocation::detect(config)).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(status) => status,
                Err(e) => {
                    error!("{:#}", e);
                    eprintln!("zenlog: {e:#}");
                    1
                }
            }
        }
    };
    std::process::exit(status);
}

async fn run_helper(command: Command, inv: Invocation) -> anyhow::Result<i32> {
    use commands::{history, info, lifecycle, membership, stream};

    match command {
        Command::InZenlog => return Ok(membership::in_zenlog(&inv)),
        Command::FailIfInZenlog => membership::fail_if_in_zenlog(&inv)?,
        Command::FailUnlessInZenlog => membership::fail_unless_in_zenlog(&inv)?,
        Command::WriteToLogger => stream::write_to_logger(&inv).await?,
        Command::WriteToOuter => stream::write_to_outer(&inv)?,
        Command::OuterTty => info::outer_tty(&inv)?,
        Command::LoggerPipe => info::logger_pipe(&inv)?,
        Command::ZenlogBin => info::zenlog_bin()?,
        Command::TempDir => info::temp_dir(&inv)?,
        Command::History(sel) => history::history(&inv, sel.kind())?,
        Command::CurrentLog(sel) => history::current_log(&inv, sel.kind()).await?,
        Command::LastLog(sel) => history::last_log(&inv, sel.kind()).await?,
        Command::AllCommands(sel) => history::all_commands(&inv, sel.kind())?,
        Command::ListLogs(sel) => history::list_logs(&inv, sel.kind())?,
        Command::CheckBinUpdate => return lifecycle::check_bin_update(&inv),
        Command::StartCommand { command } => lifecycle::start_command(&inv, &command).await?,
        Command::EndCommand => lifecycle::end_command(&inv).await?,
        Command::Flush => lifecycle::flush(&inv).await?,
    }
    Ok(0)
}

/// Run a session; on status 13 replace this process with a fresh zenlog,
/// on setup failure with an emergency shell.
async fn start_session(verbose: bool, config: anyhow::Result<Config>) -> i32 {
    if let Ok(config) = &config {
        if Invocation::detect(config.clone()).in_zenlog() {
            eprintln!("zenlog: Already in zenlog.");
            return 1;
        }
    }

    let result = async move {
        let config = config?;
        init_session_tracing(verbose, &config)?;
        session::run(&config).await
    }
    .await;

    match result {
        Ok(RESTART_STATUS) => {
            eprintln!("Restarting zenlog...");
            let err = std::process::Command::new(restart_binary())
                .args(std::env::args_os().skip(1))
                .exec();
            eprintln!("zenlog: restart failed: {err}");
            1
        }
        Ok(status) => status,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("zenlog: {e:#}");
            eprintln!("Starting emergency shell...");
            let err = std::process::Command::new(EMERGENCY_SHELL).exec();
            eprintln!("zenlog: cannot start {EMERGENCY_SHELL}: {err}");
            1
        }
    }
}

fn restart_binary() -> std::path::PathBuf {
    zenlog_core::signature::resolve_current_exe().unwrap_or_else(|_| "zenlog".into())
}

/// Accept `in_zenlog` as well as `in-zenlog`: shell function names are
/// conventionally spelled with underscores.
fn normalize_subcommand(mut args: Vec<OsString>) -> Vec<OsString> {
    if let Some(first) = args.get_mut(1) {
        if let Some(s) = first.to_str() {
            if !s.starts_with('-') && s.contains('_') {
                *first = s.replace('_', "-").into();
            }
        }
    }
    args
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
        EnvFilter::new(if verbose {
            "zenlog=debug,zenlog_core=debug"
        } else {
            "zenlog=warn,zenlog_core=warn"
        })
    })
}

/// Helpers log to stderr.
fn init_tracing(verbose: bool) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(verbose)
        .with_writer(std::io::stderr)
        .init();
}

/// A session owns the terminal, so its diagnostics go to
/// `<temp dir>/<pid>/zenlog.log` instead.
fn init_session_tracing(verbose: bool, config: &Config) -> anyhow::Result<()> {
    use anyhow::Context;

    let dir = config.session_dir(std::process::id());
    transport::create_private_dir(&dir)
        .with_context(|| format!("cannot create {}", dir.display()))?;
    let path = dir.join("zenlog.log");
    let file = open_append(&path).with_context(|| format!("cannot open {}", path.display()))?;
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_target(false)
        .with_ansi(false)
        .with_writer(std::sync::Mutex::new(file))
        .init();
    Ok(())
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
