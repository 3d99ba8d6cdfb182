use std::{io, path::PathBuf};

use anyhow::Context;
use miette::Report;

const INSTALLER_CONTEXT: &str = "while running installer";
const FILE_READ_CONTEXT: &str = "while reading object source file";
const STDIN_READ_CONTEXT: &str = "while reading object source from stdin";

pub(crate) type CliResult<T> = std::result::Result<T, CliError>;

#[derive(Debug)]
pub(crate) enum CliError {
    MissingInput,
    ReadFile { path: PathBuf, source: io::Error },
    ReadStdin(io::Error),
    Core(dbshape_core::Error),
}

impl From<dbshape_core::Error> for CliError {
    fn from(value: dbshape_core::Error) -> Self {
        Self::Core(value)
    }
}

/// One line per failure, prefixed with its category in brackets.
pub(crate) fn render_runtime_error(error: CliError) -> String {
    match error {
        CliError::MissingInput => {
            "[usage] no schema objects given: pass SQL files or pipe SQL via stdin".to_string()
        }
        CliError::ReadFile { path, source } => {
            let context = format!("{FILE_READ_CONTEXT} `{}`", path.display());
            format!("[io] {}", report_with_context(source, context))
        }
        CliError::ReadStdin(source) => {
            format!("[io] {}", report_with_context(source, STDIN_READ_CONTEXT))
        }
        CliError::Core(source) => {
            let category = source.category();
            let report = report_with_context(source, INSTALLER_CONTEXT);
            format!("[{category}] {report}")
        }
    }
}

fn report_with_context<E, C>(source: E, context: C) -> Report
where
    E: std::error::Error + Send + Sync + 'static,
    C: Into<String>,
{
    let anyhow_error = anyhow::Error::new(source).context(context.into());
    miette::miette!("{anyhow_error:#}")
}
