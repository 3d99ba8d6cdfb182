use crate::{CatalogError, Result};

pub const BEGIN_TRANSACTION_SQL: &str = "SET XACT_ABORT ON; BEGIN TRANSACTION";
pub const COMMIT_TRANSACTION_SQL: &str = "COMMIT TRANSACTION";
pub const ROLLBACK_TRANSACTION_SQL: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

/// A single value read from, or bound into, a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// One result row. Decoded into a typed struct right after the query
/// through [`FromRow`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Row {
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SqlValue> {
        self.values.get(index)
    }

    pub fn text(&self, index: usize, query: &'static str) -> std::result::Result<String, CatalogError> {
        self.opt_text(index, query)?.ok_or(CatalogError::UnexpectedValue {
            query,
            column: index,
            expected: "non-null text",
        })
    }

    pub fn opt_text(
        &self,
        index: usize,
        query: &'static str,
    ) -> std::result::Result<Option<String>, CatalogError> {
        match self.value(index, query, "text")? {
            SqlValue::Null => Ok(None),
            SqlValue::Text(value) => Ok(Some(value.clone())),
            SqlValue::Int(value) => Ok(Some(value.to_string())),
            SqlValue::Bool(_) => Err(CatalogError::UnexpectedValue {
                query,
                column: index,
                expected: "text",
            }),
        }
    }

    pub fn int(&self, index: usize, query: &'static str) -> std::result::Result<i64, CatalogError> {
        self.opt_int(index, query)?.ok_or(CatalogError::UnexpectedValue {
            query,
            column: index,
            expected: "non-null integer",
        })
    }

    pub fn opt_int(
        &self,
        index: usize,
        query: &'static str,
    ) -> std::result::Result<Option<i64>, CatalogError> {
        match self.value(index, query, "integer")? {
            SqlValue::Null => Ok(None),
            SqlValue::Int(value) => Ok(Some(*value)),
            SqlValue::Bool(value) => Ok(Some(i64::from(*value))),
            SqlValue::Text(value) => {
                value
                    .trim()
                    .parse::<i64>()
                    .map(Some)
                    .map_err(|_| CatalogError::UnexpectedValue {
                        query,
                        column: index,
                        expected: "integer",
                    })
            }
        }
    }

    pub fn bool(&self, index: usize, query: &'static str) -> std::result::Result<bool, CatalogError> {
        match self.value(index, query, "bit")? {
            SqlValue::Null => Ok(false),
            SqlValue::Bool(value) => Ok(*value),
            SqlValue::Int(value) => Ok(*value != 0),
            SqlValue::Text(value) => Ok(matches!(value.trim(), "1" | "true" | "True")),
        }
    }

    fn value(
        &self,
        index: usize,
        query: &'static str,
        expected: &'static str,
    ) -> std::result::Result<&SqlValue, CatalogError> {
        self.values.get(index).ok_or(CatalogError::MissingColumn {
            query,
            column: index,
            expected,
        })
    }
}

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> std::result::Result<Self, CatalogError>;
}

pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> Option<Self>;
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Int(value) => Some(*value),
            SqlValue::Bool(value) => Some(i64::from(*value)),
            SqlValue::Text(value) => value.trim().parse().ok(),
            SqlValue::Null => None,
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Text(value) => Some(value.clone()),
            SqlValue::Int(value) => Some(value.to_string()),
            SqlValue::Bool(value) => Some(value.to_string()),
            SqlValue::Null => None,
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Bool(value) => Some(*value),
            SqlValue::Int(value) => Some(*value != 0),
            SqlValue::Text(value) => Some(matches!(value.trim(), "1" | "true" | "True")),
            SqlValue::Null => None,
        }
    }
}

/// The thin adapter the engine drives. Methods take `&self`; adapters use
/// interior mutability so catalog reads and execution can share one
/// connection.
pub trait Connection {
    /// Runs one batch and returns the affected row count.
    fn execute(&self, sql: &str) -> Result<u64>;

    /// Runs a parameterized query (`@P1`, `@P2`, ...) and returns its rows.
    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>>;
}

pub trait ConnectionExt: Connection {
    /// First column of the first row, if any.
    fn scalar<T: FromSqlValue>(&self, sql: &str, params: &[SqlValue]) -> Result<Option<T>> {
        let rows = self.query(sql, params)?;
        Ok(rows
            .first()
            .and_then(|row| row.get(0))
            .and_then(T::from_sql_value))
    }

    fn query_as<T: FromRow>(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<T>> {
        let rows = self.query(sql, params)?;
        rows.iter()
            .map(|row| T::from_row(row).map_err(Into::into))
            .collect()
    }
}

impl<C: Connection + ?Sized> ConnectionExt for C {}

/// Transaction guard. Dropping it without [`Transaction::commit`] rolls back.
pub struct Transaction<'a> {
    connection: &'a dyn Connection,
    finished: bool,
}

impl<'a> Transaction<'a> {
    pub fn begin(connection: &'a dyn Connection) -> Result<Self> {
        connection.execute(BEGIN_TRANSACTION_SQL)?;
        Ok(Self {
            connection,
            finished: false,
        })
    }

    pub fn commit(mut self) -> Result<()> {
        self.connection.execute(COMMIT_TRANSACTION_SQL)?;
        self.finished = true;
        Ok(())
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.connection.execute(ROLLBACK_TRANSACTION_SQL)?;
        Ok(())
    }
}

impl Connection for Transaction<'_> {
    fn execute(&self, sql: &str) -> Result<u64> {
        self.connection.execute(sql)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        self.connection.query(sql, params)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.connection.execute(ROLLBACK_TRANSACTION_SQL);
        }
    }
}
