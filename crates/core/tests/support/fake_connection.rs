#![allow(dead_code)]

use std::{cell::RefCell, error::Error as StdError, fmt};

use dbshape_core::{
    BEGIN_TRANSACTION_SQL, COMMIT_TRANSACTION_SQL, Connection, ExecutionError,
    ROLLBACK_TRANSACTION_SQL, Result, Row, SchemaObject, SqlValue,
};

pub const REGISTRY_SELECT: &str = "FROM [dbo].[SchemaRegistry]";

#[derive(Debug, Default)]
struct FakeConnectionState {
    executed_sql: Vec<String>,
    queries: Vec<String>,
    responses: Vec<(String, Vec<Row>)>,
    fail_on_sql: Option<(String, String)>,
}

/// Records every statement and answers queries from canned rows keyed by a
/// fragment of their text.
#[derive(Debug, Default)]
pub struct FakeConnection {
    state: RefCell<FakeConnectionState>,
}

impl FakeConnection {
    pub fn respond(&self, fragment: impl Into<String>, rows: Vec<Row>) {
        self.state
            .borrow_mut()
            .responses
            .push((fragment.into(), rows));
    }

    /// Registry rows `(group, name, signature, type, order)` for one group.
    pub fn with_registry(&self, group: &str, objects: &[&SchemaObject]) {
        let rows = objects
            .iter()
            .map(|object| registry_row(group, object))
            .collect();
        self.respond(REGISTRY_SELECT, rows);
    }

    pub fn set_fail_on_sql(&self, fragment: impl Into<String>, message: impl Into<String>) {
        self.state.borrow_mut().fail_on_sql = Some((fragment.into(), message.into()));
    }

    pub fn executed_sql(&self) -> Vec<String> {
        self.state.borrow().executed_sql.clone()
    }

    /// Executed statements other than transaction control and registry
    /// upkeep.
    pub fn ddl(&self) -> Vec<String> {
        self.executed_sql()
            .into_iter()
            .filter(|sql| {
                sql != BEGIN_TRANSACTION_SQL
                    && sql != COMMIT_TRANSACTION_SQL
                    && sql != ROLLBACK_TRANSACTION_SQL
                    && !sql.contains("[SchemaRegistry]")
            })
            .collect()
    }

    pub fn count(&self, sql: &str) -> usize {
        self.state
            .borrow()
            .executed_sql
            .iter()
            .filter(|executed| executed.as_str() == sql)
            .count()
    }
}

impl Connection for FakeConnection {
    fn execute(&self, sql: &str) -> Result<u64> {
        let mut state = self.state.borrow_mut();
        if let Some((fragment, message)) = &state.fail_on_sql
            && sql.contains(fragment.as_str())
        {
            return Err(ExecutionError::statement_failed(sql, FakeSourceError(message.clone())).into());
        }
        state.executed_sql.push(sql.to_string());
        Ok(0)
    }

    fn query(&self, sql: &str, _params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut state = self.state.borrow_mut();
        state.queries.push(sql.to_string());
        Ok(state
            .responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }
}

pub fn registry_row(group: &str, object: &SchemaObject) -> Row {
    Row::new(vec![
        SqlValue::from(group),
        SqlValue::from(object.name()),
        SqlValue::from(object.signature().as_str()),
        SqlValue::from(object.kind().as_str()),
        SqlValue::from(object.original_order() as i64),
    ])
}

#[derive(Debug)]
pub struct FakeSourceError(pub String);

impl fmt::Display for FakeSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for FakeSourceError {}
