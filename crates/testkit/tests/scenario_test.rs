use std::path::PathBuf;

use dbshape_testkit::{TestCase, TestResult, load_test_cases_from_dir, load_test_cases_from_str, run_test};

#[test]
fn yaml_scenarios_pass_against_the_fake_server() {
    let case_files = load_test_cases_from_dir(scenario_root())
        .unwrap_or_else(|error| panic!("failed to load scenario files: {error}"));

    assert!(!case_files.is_empty(), "scenario directory must not be empty");

    let mut case_count = 0_usize;
    for case_file in case_files {
        assert!(
            !case_file.cases.is_empty(),
            "scenario file '{}' must contain at least one testcase",
            case_file.path.display()
        );

        for (case_name, case) in case_file.cases {
            case_count += 1;
            match run_test(&case) {
                TestResult::Passed => {}
                TestResult::Skipped(reason) => panic!(
                    "testcase '{}::{}' unexpectedly skipped: {}",
                    case_file.file_name, case_name, reason
                ),
                TestResult::Failed(reason) => panic!(
                    "testcase '{}::{}' failed: {}",
                    case_file.file_name, case_name, reason
                ),
            }
        }
    }

    assert!(case_count >= 10, "expected at least 10 scenarios, found {case_count}");
}

#[test]
fn unknown_testcase_fields_are_rejected() {
    let error = load_test_cases_from_str("broken:\n  desired: ''\n  enable_drop: true\n")
        .expect_err("unknown field must fail");
    assert!(error.to_string().contains("enable_drop"), "{error}");
}

#[test]
fn mismatched_up_script_fails_the_case() {
    let case = TestCase {
        desired: "CREATE VIEW [dbo].[One] AS SELECT 1 AS [One]".to_string(),
        up: Some("CREATE VIEW [dbo].[Two] AS SELECT 2 AS [Two]\nGO".to_string()),
        ..TestCase::default()
    };

    let TestResult::Failed(reason) = run_test(&case) else {
        panic!("mismatched up script must fail");
    };
    assert!(reason.starts_with("up SQL mismatch"), "{reason}");
}

#[test]
fn expected_error_must_come_from_the_desired_install() {
    let case = TestCase {
        desired: "CREATE VIEW [dbo].[One] AS SELECT 1 AS [One]".to_string(),
        error: Some("duplicate schema object name [dbo].[One]".to_string()),
        ..TestCase::default()
    };

    let TestResult::Failed(reason) = run_test(&case) else {
        panic!("a case that installs cleanly cannot satisfy `error`");
    };
    assert!(reason.contains("but got no error"), "{reason}");
}

#[test]
fn presence_expectations_are_checked() {
    let case = TestCase {
        desired: "CREATE VIEW [dbo].[One] AS SELECT 1 AS [One]".to_string(),
        exists: vec!["View [dbo].[Two]".to_string()],
        ..TestCase::default()
    };

    assert_eq!(
        run_test(&case),
        TestResult::Failed("View [dbo].[Two] is missing".to_string())
    );
}

fn scenario_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests").join("scenarios")
}
