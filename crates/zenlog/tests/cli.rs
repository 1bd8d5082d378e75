use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

const SESSION_VARS: &[&str] = &[
    "ZENLOG_SIGNATURE",
    "ZENLOG_LOGGER_IN",
    "ZENLOG_LOGGER_OUT",
    "ZENLOG_OUTER_TTY",
    "ZENLOG_BIN_CTIME",
    "ZENLOG_TTY",
    "ZENLOG_PID",
    "ZENLOG_START_TIME",
    "ZENLOG_DIR",
    "ZENLOG_BIN",
    "ZENLOG_TEMP_DIR",
    "ZENLOG_START_COMMAND",
    "ZENLOG_LOG",
];

/// `zenlog` with a private home and no session in its environment.
fn zenlog(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("zenlog").unwrap();
    for var in SESSION_VARS {
        cmd.env_remove(var);
    }
    cmd.env("HOME", home);
    cmd
}

fn write_log(log_dir: &Path, tree: &str, name: &str, content: &str) {
    let path = log_dir.join(tree).join("2024/01/02").join(name);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

#[test]
fn in_zenlog_is_false_outside_a_session() {
    let home = tempfile::tempdir().unwrap();
    zenlog(home.path())
        .arg("in-zenlog")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty());
}

#[test]
fn underscored_names_are_accepted() {
    let home = tempfile::tempdir().unwrap();
    zenlog(home.path()).arg("in_zenlog").assert().code(1);
    zenlog(home.path()).arg("fail_if_in_zenlog").assert().success();
}

#[test]
fn membership_guards() {
    let home = tempfile::tempdir().unwrap();
    zenlog(home.path()).arg("fail-if-in-zenlog").assert().success();
    zenlog(home.path())
        .arg("fail-unless-in-zenlog")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not in zenlog"));
}

#[test]
fn session_helpers_refuse_to_run_outside() {
    let home = tempfile::tempdir().unwrap();
    for args in [
        vec!["start-command", "ls"],
        vec!["end-command"],
        vec!["stop-log"],
        vec!["check-bin-update"],
        vec!["outer-tty"],
        vec!["logger-pipe"],
        vec!["history"],
        vec!["current-log"],
    ] {
        zenlog(home.path())
            .args(&args)
            .assert()
            .failure()
            .stderr(predicate::str::starts_with("zenlog: "));
    }
}

#[test]
fn forged_session_variables_are_not_membership() {
    let home = tempfile::tempdir().unwrap();
    let mut cmd = zenlog(home.path());
    cmd.env("ZENLOG_SIGNATURE", "/dev/pts/99:/usr/bin/zenlog:[1]")
        .env("ZENLOG_LOGGER_IN", home.path().join("in"))
        .env("ZENLOG_LOGGER_OUT", home.path().join("out"))
        .env("ZENLOG_OUTER_TTY", "/dev/pts/0")
        .env("ZENLOG_BIN_CTIME", "0")
        .env("ZENLOG_TTY", "/dev/pts/99")
        .env("ZENLOG_PID", "4242")
        .env("ZENLOG_START_TIME", "0")
        .env("ZENLOG_DIR", home.path())
        .env("ZENLOG_BIN", "/usr/bin/zenlog");
    cmd.arg("in-zenlog").assert().code(1);
}

#[test]
fn all_commands_lists_recorded_commands() {
    let home = tempfile::tempdir().unwrap();
    let logs = home.path().join("logs");
    let first = "10-00-00.000-00100-000001_ls.log";
    let second = "10-00-01.000-00100-000002_git.log";
    write_log(&logs, "SAN", first, "$ ls\na.txt\nb.txt\n");
    write_log(&logs, "SAN", second, "$ git status\nclean\n");

    let expected = format!(
        "{} $ ls\n{} $ git status\n",
        logs.join("SAN/2024/01/02").join(first).display(),
        logs.join("SAN/2024/01/02").join(second).display(),
    );
    zenlog(home.path())
        .env("ZENLOG_DIR", &logs)
        .arg("all-commands")
        .assert()
        .success()
        .stdout(predicate::str::diff(expected));

    zenlog(home.path())
        .env("ZENLOG_DIR", &logs)
        .args(["all-commands", "-r"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            logs.join("RAW/2024/01/02").join(first).display().to_string(),
        ));
}

#[test]
fn list_logs_reads_the_configured_directory() {
    let home = tempfile::tempdir().unwrap();
    let logs = home.path().join("from-config");
    write_log(&logs, "SAN", "10-00-00.000-00100-000001_ls.log", "$ ls\n");
    let config = home.path().join("zenlog.toml");
    fs::write(
        &config,
        format!("[zenlog]\nlog_dir = \"{}\"\n", logs.display()),
    )
    .unwrap();

    zenlog(home.path())
        .args(["--config", config.to_str().unwrap(), "list-logs", "-e"])
        .assert()
        .success()
        .stdout(predicate::str::diff(format!(
            "{}\n",
            logs.join("ENV/2024/01/02/10-00-00.000-00100-000001_ls.log").display()
        )));
}

#[test]
fn listing_an_empty_log_dir_prints_nothing() {
    let home = tempfile::tempdir().unwrap();
    zenlog(home.path())
        .env("ZENLOG_DIR", home.path().join("nothing-here"))
        .arg("all-commands")
        .assert()
        .success()
        .stdout(predicate::str::is_empty());
}

#[test]
fn temp_dir_follows_the_environment() {
    let home = tempfile::tempdir().unwrap();
    let temp = home.path().join("scratch");
    zenlog(home.path())
        .env("ZENLOG_TEMP_DIR", &temp)
        .arg("temp-dir")
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{}\n", temp.display())));
}

#[test]
fn zenlog_bin_prints_an_absolute_path() {
    let home = tempfile::tempdir().unwrap();
    zenlog(home.path())
        .arg("zenlog-bin")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("/").and(predicate::str::contains("zenlog")));
}

#[test]
fn unknown_subcommand_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    zenlog(home.path()).arg("no-such-thing").assert().failure();
}
