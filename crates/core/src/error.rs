use std::{error::Error as StdError, fmt};

use thiserror::Error;

pub type BoxError = Box<dyn StdError + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;

const SQL_SNIPPET_LIMIT: usize = 120;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validate(#[from] ValidationError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Execute(#[from] ExecutionError),
    #[error(transparent)]
    Verify(#[from] VerificationError),
    #[error(transparent)]
    Unsupported(#[from] UnsupportedError),
}

impl Error {
    /// Short category tag used by front ends when presenting errors.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Parse(_) => "parse",
            Self::Validate(_) => "validate",
            Self::Catalog(_) => "catalog",
            Self::Execute(_) => "execute",
            Self::Verify(_) => "verify",
            Self::Unsupported(_) => "unsupported",
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no schema object pattern matches sql: {}", snippet(.sql))]
    Unrecognized { sql: String },
    #[error("anonymous {construct} in {object} is not supported; name it with CONSTRAINT <name>")]
    AnonymousConstraint {
        object: String,
        construct: &'static str,
        sql: String,
    },
    #[error("invalid AUTOPROC directive `{directive}`: {reason}")]
    AutoProcDirective { directive: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("duplicate schema object name {name}")]
    DuplicateName { name: String },
    #[error("invalid schema object name `{name}`: {reason}")]
    InvalidName { name: String, reason: &'static str },
    #[error("{name} is already registered in schema group `{registered_group}`")]
    ForeignGroup {
        name: String,
        registered_group: String,
    },
    #[error("schema group name must not be empty")]
    EmptyGroup,
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog row for `{query}` is missing column {column} ({expected})")]
    MissingColumn {
        query: &'static str,
        column: usize,
        expected: &'static str,
    },
    #[error("catalog row for `{query}` has an unexpected value in column {column}: expected {expected}")]
    UnexpectedValue {
        query: &'static str,
        column: usize,
        expected: &'static str,
    },
    #[error("unknown schema object type `{value}` in registry")]
    UnknownKind { value: String },
    #[error("table {table} does not exist")]
    MissingTable { table: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectAction {
    Drop,
    Create,
    Modify,
}

impl fmt::Display for ObjectAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Drop => "drop",
            Self::Create => "create",
            Self::Modify => "modify",
        })
    }
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("statement failed: {source}; sql: {}", snippet(.sql))]
    StatementFailed {
        sql: String,
        #[source]
        source: BoxError,
    },
    #[error("failed to {action} {object}: {source}")]
    ObjectFailed {
        object: String,
        action: ObjectAction,
        #[source]
        source: Box<Error>,
    },
    #[error("connection failed: {source}")]
    Connection {
        #[source]
        source: BoxError,
    },
}

impl ExecutionError {
    pub fn statement_failed<E>(sql: impl Into<String>, source: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::StatementFailed {
            sql: sql.into(),
            source: Box::new(source),
        }
    }

    pub(crate) fn object_failed(object: &str, action: ObjectAction, source: Error) -> Self {
        Self::ObjectFailed {
            object: object.to_string(),
            action,
            source: Box::new(source),
        }
    }
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("{kind} {name} does not exist after install")]
    MissingObject { name: String, kind: String },
}

#[derive(Debug, Error)]
pub enum UnsupportedError {
    #[error("table {table} would move from data space `{from}` to `{to}`; relocating tables is not supported")]
    StorageRelocation {
        table: String,
        from: String,
        to: String,
    },
    #[error("column {column} of {table}: {detail}")]
    IdentityChange {
        table: String,
        column: String,
        detail: &'static str,
    },
    #[error("AUTOPROC {verb} requires key columns but {table} has none")]
    KeylessAutoProc { table: String, verb: &'static str },
}

fn snippet(sql: &str) -> String {
    let flattened = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= SQL_SNIPPET_LIMIT {
        return flattened;
    }

    let mut truncated = flattened.chars().take(SQL_SNIPPET_LIMIT).collect::<String>();
    truncated.push_str("...");
    truncated
}

#[cfg(test)]
mod tests {
    use super::snippet;

    #[test]
    fn snippet_flattens_whitespace_and_truncates() {
        assert_eq!(snippet("CREATE  TABLE\n  x (id int)"), "CREATE TABLE x (id int)");

        let long = "x".repeat(200);
        let rendered = snippet(&long);
        assert!(rendered.ends_with("..."));
        assert_eq!(rendered.chars().count(), 123);
    }
}
