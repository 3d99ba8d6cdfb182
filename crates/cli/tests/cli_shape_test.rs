use std::{
    fs,
    io::Write,
    process::{Command, Output, Stdio},
};

use tempfile::tempdir;

const TARGET: [&str; 4] = ["--database", "app", "--group", "beer"];

fn run_dbshape(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dbshape"))
        .args(args)
        .env_remove("DBSHAPE_PASSWORD")
        .stdin(Stdio::null())
        .output()
        .unwrap_or_else(|error| panic!("failed to run dbshape: {error}"))
}

fn run_dbshape_with_stdin(args: &[&str], stdin_sql: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_dbshape"))
        .args(args)
        .env_remove("DBSHAPE_PASSWORD")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|error| panic!("failed to run dbshape with stdin: {error}"));

    let mut stdin = child
        .stdin
        .take()
        .unwrap_or_else(|| panic!("failed to capture child stdin"));
    stdin
        .write_all(stdin_sql.as_bytes())
        .unwrap_or_else(|error| panic!("failed to write stdin payload: {error}"));
    drop(stdin);

    child
        .wait_with_output()
        .unwrap_or_else(|error| panic!("failed to wait for dbshape: {error}"))
}

fn with_target<'a>(command: &'a str, rest: &[&'a str]) -> Vec<&'a str> {
    let mut args = vec![command];
    args.extend(TARGET);
    args.extend(rest.iter().copied());
    args
}

#[test]
fn requires_a_subcommand() {
    let output = run_dbshape(&[]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Usage"), "{stderr}");
}

#[test]
fn install_help_lists_connection_and_group_flags() {
    let output = run_dbshape(&["install", "--help"]);

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for flag in [
        "--server",
        "--port",
        "--user",
        "--password",
        "--database",
        "--group",
        "--registry-table",
        "--dry-run",
    ] {
        assert!(stdout.contains(flag), "{flag} missing from:\n{stdout}");
    }
}

#[test]
fn group_is_required() {
    let output = run_dbshape(&["plan", "--database", "app"]);

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--group"), "{stderr}");
}

#[test]
fn unrecognized_sql_fails_before_connecting() {
    let output = run_dbshape_with_stdin(&with_target("install", &[]), "SELECT 1\nGO\n");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[parse]"), "{stderr}");
    assert!(stderr.contains("no schema object pattern matches sql"), "{stderr}");
}

#[test]
fn empty_input_is_a_usage_error() {
    let output = run_dbshape_with_stdin(&with_target("plan", &[]), "  \n");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("[usage]"), "{stderr}");
}

#[test]
fn unreadable_file_is_an_io_error() {
    let tempdir = tempdir().unwrap_or_else(|error| panic!("failed to create tempdir: {error}"));
    let missing = tempdir.path().join("missing.sql");
    let missing = missing.to_string_lossy().into_owned();

    let output = run_dbshape(&with_target("install", &[missing.as_str()]));

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[io]"), "{stderr}");
    assert!(stderr.contains("missing.sql"), "{stderr}");
}

#[test]
fn connection_needs_a_user() {
    let tempdir = tempdir().unwrap_or_else(|error| panic!("failed to create tempdir: {error}"));
    let schema = tempdir.path().join("beer.sql");
    fs::write(
        &schema,
        "CREATE TABLE [dbo].[Beer] ([Id] int NOT NULL CONSTRAINT [PK_Beer] PRIMARY KEY)\nGO\n",
    )
    .unwrap_or_else(|error| panic!("failed to write schema file: {error}"));
    let schema = schema.to_string_lossy().into_owned();

    let output = run_dbshape(&with_target("install", &["--dry-run", schema.as_str()]));

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("[execute]"), "{stderr}");
    assert!(stderr.contains("mssql user is required"), "{stderr}");
}

#[test]
fn uninstall_reads_no_input() {
    let output = run_dbshape(&with_target("uninstall", &[]));

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("mssql user is required"), "{stderr}");
}
