use tracing::debug;

use crate::{ExecutionError, ObjectAction, Result, connection::Connection};

/// Runs statements on behalf of one object at a time and keeps every
/// statement that succeeded.
pub struct Executor<'a> {
    connection: &'a dyn Connection,
    executed: Vec<String>,
}

impl<'a> Executor<'a> {
    #[must_use]
    pub fn new(connection: &'a dyn Connection) -> Self {
        Self {
            connection,
            executed: Vec::new(),
        }
    }

    /// Runs `statements` in order; the first failure is reported against
    /// `object`.
    pub fn run(&mut self, object: &str, action: ObjectAction, statements: &[String]) -> Result<()> {
        for sql in statements {
            debug!(target: "dbshape::execute", object, %action, "{sql}");
            self.connection
                .execute(sql)
                .map_err(|source| ExecutionError::object_failed(object, action, source))?;
            self.executed.push(sql.clone());
        }
        Ok(())
    }

    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    #[must_use]
    pub fn into_executed(self) -> Vec<String> {
        self.executed
    }
}
