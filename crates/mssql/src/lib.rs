//! SQL Server [`dbshape_core::Connection`] over tiberius.

mod connection;
mod value;

pub use connection::{MssqlConnection, SERVER_VERSION_QUERY, parse_server_version};
