mod fake_server;
mod yaml_runner;

pub use fake_server::{FakeServer, ServerError};
pub use yaml_runner::{
    RunnerError, TestCase, TestCaseFile, TestResult, load_test_cases_from_dir,
    load_test_cases_from_str, run_test,
};

