use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use dbshape_core::{InstallOptions, InstallReport, Installer, SchemaObjectKind};
use serde::Deserialize;

use crate::FakeServer;

const DEFAULT_SCHEMA_GROUP: &str = "yaml";

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestCase {
    /// Installed first, then checked for idempotency.
    pub current: String,
    pub desired: String,
    /// Expected script of the `current -> desired` install.
    pub up: Option<String>,
    /// Expected script of reinstalling `current` afterwards.
    pub down: Option<String>,
    /// Expected error text of the `current -> desired` install.
    pub error: Option<String>,
    pub group: Option<String>,
    /// `Kind name` pairs that must exist after the desired install.
    pub exists: Vec<String>,
    /// `Kind name` pairs that must be gone after the desired install.
    pub missing: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestResult {
    Passed,
    Skipped(String),
    Failed(String),
}

#[derive(Debug)]
pub struct TestCaseFile {
    pub path: PathBuf,
    pub file_name: String,
    pub cases: BTreeMap<String, TestCase>,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("invalid yaml testcase: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Install(#[from] dbshape_core::Error),
    #[error("{0}")]
    Assertion(String),
}

type Result<T> = std::result::Result<T, RunnerError>;

pub fn load_test_cases_from_str(yaml: &str) -> Result<BTreeMap<String, TestCase>> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Every `*.yml` / `*.yaml` file directly under `dir`, sorted by file name.
pub fn load_test_cases_from_dir(dir: impl AsRef<Path>) -> Result<Vec<TestCaseFile>> {
    let dir = dir.as_ref();
    let io_error = |source| RunnerError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut paths = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        let is_yaml = path
            .extension()
            .and_then(|extension| extension.to_str())
            .is_some_and(|extension| matches!(extension, "yml" | "yaml"));
        if is_yaml {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let yaml = fs::read_to_string(&path).map_err(|source| RunnerError::Io {
                path: path.clone(),
                source,
            })?;
            let cases = load_test_cases_from_str(&yaml)?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(TestCaseFile {
                path,
                file_name,
                cases,
            })
        })
        .collect()
}

/// Runs one case against a fresh [`FakeServer`].
pub fn run_test(test: &TestCase) -> TestResult {
    let server = FakeServer::new();
    match evaluate_expected_error(test, run_test_flow(&server, test)) {
        Ok(()) => TestResult::Passed,
        Err(error) => TestResult::Failed(error.to_string()),
    }
}

/// Where a flow stopped. Only the desired install may produce a case's
/// expected error.
enum FlowError {
    Desired(dbshape_core::Error),
    Runner(RunnerError),
}

impl From<RunnerError> for FlowError {
    fn from(error: RunnerError) -> Self {
        Self::Runner(error)
    }
}

fn run_test_flow(server: &FakeServer, test: &TestCase) -> std::result::Result<(), FlowError> {
    let group = test.group.as_deref().unwrap_or(DEFAULT_SCHEMA_GROUP);

    // 1) Install current schema.
    install(server, group, &test.current)?;

    // 2) Verify idempotency of current schema.
    assert_idempotency(server, group, &test.current, "current schema")?;

    // 3) Install desired schema and validate expected up SQL.
    let forward = installer(server, group)
        .install_sql(&test.desired)
        .map_err(FlowError::Desired)?;
    assert_expected_sql("up", test.up.as_deref(), &forward)?;

    // 4) Verify idempotency of desired schema.
    assert_idempotency(server, group, &test.desired, "desired schema")?;
    assert_presence(server, test)?;

    // 5) Reinstall current schema and validate expected down SQL.
    if let Some(expected) = test.down.as_deref() {
        let reverse = install(server, group, &test.current)?;
        assert_expected_sql("down", Some(expected), &reverse)?;
        assert_idempotency(server, group, &test.current, "current schema after reverse")?;
    }

    Ok(())
}

fn installer<'s>(server: &'s FakeServer, group: &str) -> Installer<'s> {
    Installer::new(server, InstallOptions::new(group)).with_catalog(server)
}

fn install(server: &FakeServer, group: &str, source: &str) -> Result<InstallReport> {
    Ok(installer(server, group).install_sql(source)?)
}

fn evaluate_expected_error(
    test: &TestCase,
    execution_result: std::result::Result<(), FlowError>,
) -> Result<()> {
    let Some(expected_error) = test.error.as_deref() else {
        return match execution_result {
            Ok(()) => Ok(()),
            Err(FlowError::Desired(error)) => Err(error.into()),
            Err(FlowError::Runner(error)) => Err(error),
        };
    };

    match execution_result {
        Ok(()) => Err(assertion(format!(
            "expected error: {expected_error}, but got no error"
        ))),
        Err(FlowError::Desired(actual_error)) => {
            let actual_error = actual_error.to_string();
            if actual_error == expected_error.trim() {
                Ok(())
            } else {
                Err(assertion(format!(
                    "expected error: {expected_error}, but got: {actual_error}"
                )))
            }
        }
        Err(FlowError::Runner(error)) => Err(assertion(format!(
            "expected error: {expected_error}, but failed outside the desired install: {error}"
        ))),
    }
}

fn assert_idempotency(server: &FakeServer, group: &str, source: &str, phase: &str) -> Result<()> {
    let report = install(server, group, source)?;
    if report.statements.is_empty() {
        return Ok(());
    }

    Err(assertion(format!(
        "{phase} is not idempotent; expected no changes but got:\n{}",
        report.script().trim()
    )))
}

fn assert_expected_sql(direction: &str, expected: Option<&str>, report: &InstallReport) -> Result<()> {
    let Some(expected) = expected else {
        return Ok(());
    };

    let actual = report.script();
    if expected.trim() == actual.trim() {
        return Ok(());
    }

    Err(assertion(format!(
        "{direction} SQL mismatch; expected:\n{}\nactual:\n{}",
        expected.trim(),
        actual.trim()
    )))
}

fn assert_presence(server: &FakeServer, test: &TestCase) -> Result<()> {
    for (entries, wanted) in [(&test.exists, true), (&test.missing, false)] {
        for entry in entries {
            let (kind, name) = parse_presence(entry)?;
            let present = server.object_names(kind).iter().any(|existing| {
                dbshape_core::names_equal(existing, &name)
            });
            if present != wanted {
                let state = if wanted { "missing" } else { "still present" };
                return Err(assertion(format!("{kind} {name} is {state}")));
            }
        }
    }
    Ok(())
}

fn parse_presence(entry: &str) -> Result<(SchemaObjectKind, String)> {
    let Some((kind, name)) = entry.trim().split_once(' ') else {
        return Err(assertion(format!("expected `Kind name`, got `{entry}`")));
    };
    let kind = kind
        .parse::<SchemaObjectKind>()
        .map_err(|error| assertion(format!("{entry}: {error}")))?;
    Ok((kind, name.trim().to_string()))
}

fn assertion(message: impl Into<String>) -> RunnerError {
    RunnerError::Assertion(message.into())
}
