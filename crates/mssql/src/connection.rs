use std::{
    error::Error as StdError,
    io,
    sync::{Mutex, MutexGuard},
};

use dbshape_core::{
    Connection, ConnectionConfig, ExecutionError, Result, Row, SqlValue, Version,
};
use futures_util::TryStreamExt;
use tiberius::{AuthMethod, Client, Config, QueryItem, ToSql};
use tokio::{
    net::TcpStream,
    runtime::{Builder, Runtime},
};
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::value::{Param, column_value};

type TdsClient = Client<Compat<TcpStream>>;

pub const SERVER_VERSION_QUERY: &str =
    "SELECT CAST(SERVERPROPERTY('ProductVersion') AS nvarchar(128))";

const DEFAULT_MSSQL_HOST: &str = "127.0.0.1";
const DEFAULT_MSSQL_PORT: u16 = 1433;
const APPLICATION_NAME: &str = "dbshape";
const INSTANCE_KEY: &str = "mssql.instance";
const TRUST_CERT_KEY: &str = "mssql.trust_cert";
const POISONED_CONNECTION_MESSAGE: &str = "mssql connection state was poisoned";

/// One TDS session driven from synchronous code. Statements and queries
/// share the session, so everything runs inside the caller's transaction.
pub struct MssqlConnection {
    state: Mutex<LiveState>,
    server_version: Version,
}

struct LiveState {
    runtime: Runtime,
    client: TdsClient,
}

impl MssqlConnection {
    pub fn connect(config: &ConnectionConfig) -> Result<Self> {
        let tds_config = build_tiberius_config(config)?;
        let mut state = connect_live_state(tds_config)?;

        let raw_version = query_rows(&mut state, SERVER_VERSION_QUERY, &[])?
            .first()
            .and_then(|row| row.get(0))
            .and_then(|value| match value {
                SqlValue::Text(text) => Some(text.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                connection_error(io::Error::other("server did not report ProductVersion"))
            })?;
        let server_version = parse_server_version(&raw_version).ok_or_else(|| {
            connection_error(io::Error::other(format!(
                "failed to parse mssql server version string: `{raw_version}`"
            )))
        })?;
        info!(
            database = config.database.as_str(),
            version = raw_version.as_str(),
            "connected to sql server"
        );

        Ok(Self {
            state: Mutex::new(state),
            server_version,
        })
    }

    #[must_use]
    pub fn server_version(&self) -> Version {
        self.server_version
    }

    fn lock(&self) -> Result<MutexGuard<'_, LiveState>> {
        self.state
            .lock()
            .map_err(|_| connection_error(io::Error::other(POISONED_CONNECTION_MESSAGE)))
    }
}

impl Connection for MssqlConnection {
    fn execute(&self, sql: &str) -> Result<u64> {
        let mut state = self.lock()?;
        execute_live_sql(&mut state, sql)
    }

    fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let mut state = self.lock()?;
        query_rows(&mut state, sql, params)
    }
}

fn build_tiberius_config(config: &ConnectionConfig) -> Result<Config> {
    let host = config.host.as_deref().unwrap_or(DEFAULT_MSSQL_HOST);
    let user = config
        .user
        .clone()
        .ok_or_else(|| connection_error(io::Error::other("mssql user is required")))?;
    let password = config.password.clone().unwrap_or_default();

    let mut tds_config = Config::new();
    tds_config.host(host);
    match config.extra.get(INSTANCE_KEY) {
        Some(instance) => tds_config.instance_name(instance),
        None => tds_config.port(config.port.unwrap_or(DEFAULT_MSSQL_PORT)),
    }
    tds_config.database(config.database.as_str());
    tds_config.application_name(APPLICATION_NAME);
    tds_config.authentication(AuthMethod::sql_server(user, password));
    if config
        .extra
        .get(TRUST_CERT_KEY)
        .is_none_or(|value| value != "false")
    {
        tds_config.trust_cert();
    }

    Ok(tds_config)
}

fn connect_live_state(tds_config: Config) -> Result<LiveState> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(connection_error)?;

    let client = runtime.block_on(async {
        let tcp = TcpStream::connect(tds_config.get_addr())
            .await
            .map_err(connection_error)?;
        tcp.set_nodelay(true).map_err(connection_error)?;

        Client::connect(tds_config, tcp.compat_write())
            .await
            .map_err(connection_error)
    })?;

    Ok(LiveState { runtime, client })
}

/// Batches go through `simple_query` so session state such as an open
/// transaction survives them. The simple protocol does not report row
/// counts; the result is the number of rows returned, usually zero.
fn execute_live_sql(state: &mut LiveState, sql: &str) -> Result<u64> {
    let LiveState { runtime, client } = state;
    debug!(target: "dbshape::mssql", "{sql}");

    runtime.block_on(async {
        let mut stream = client
            .simple_query(sql)
            .await
            .map_err(|source| statement_error(sql, source))?;
        let mut rows = 0;
        while let Some(item) = stream
            .try_next()
            .await
            .map_err(|source| statement_error(sql, source))?
        {
            if matches!(item, QueryItem::Row(_)) {
                rows += 1;
            }
        }
        Ok(rows)
    })
}

fn query_rows(state: &mut LiveState, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
    let LiveState { runtime, client } = state;
    let params = params.iter().map(Param).collect::<Vec<_>>();
    let params = params
        .iter()
        .map(|param| param as &dyn ToSql)
        .collect::<Vec<_>>();

    runtime.block_on(async {
        let stream = client
            .query(sql, &params)
            .await
            .map_err(|source| statement_error(sql, source))?;
        let rows = stream
            .into_first_result()
            .await
            .map_err(|source| statement_error(sql, source))?;

        Ok(rows
            .into_iter()
            .map(|row| Row::new(row.into_iter().map(column_value).collect()))
            .collect())
    })
}

/// Parses `ProductVersion` output such as `16.0.4135.4`.
#[must_use]
pub fn parse_server_version(raw: &str) -> Option<Version> {
    let mut parts = raw.split_whitespace().next()?.split('.');
    let major = parse_u16_component(parts.next()?)?;
    let minor = parts.next().and_then(parse_u16_component).unwrap_or(0);
    let patch = parts.next().and_then(parse_u16_component).unwrap_or(0);

    Some(Version::new(major, minor, patch))
}

fn parse_u16_component(raw: &str) -> Option<u16> {
    let digits = raw
        .chars()
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<u16>().ok()
}

fn statement_error<E>(sql: &str, source: E) -> dbshape_core::Error
where
    E: StdError + Send + Sync + 'static,
{
    ExecutionError::statement_failed(sql, source).into()
}

fn connection_error<E>(source: E) -> dbshape_core::Error
where
    E: StdError + Send + Sync + 'static,
{
    ExecutionError::Connection {
        source: Box::new(source),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use dbshape_core::ConnectionConfig;

    use super::build_tiberius_config;

    #[test]
    fn config_uses_defaults_for_host_and_port() {
        let config = ConnectionConfig {
            user: Some("sa".to_string()),
            database: "app".to_string(),
            ..ConnectionConfig::default()
        };

        let tds_config = build_tiberius_config(&config).expect("config");
        assert_eq!(tds_config.get_addr(), "127.0.0.1:1433");
    }

    #[test]
    fn explicit_port_is_honoured() {
        let config = ConnectionConfig {
            host: Some("db.internal".to_string()),
            port: Some(14330),
            user: Some("sa".to_string()),
            database: "app".to_string(),
            extra: BTreeMap::new(),
            ..ConnectionConfig::default()
        };

        let tds_config = build_tiberius_config(&config).expect("config");
        assert_eq!(tds_config.get_addr(), "db.internal:14330");
    }
}
