use dbshape_core::{
    ConnectionConfig, ConnectionExt, Error, ExecutionError, InstallOptions, Installer,
};
use dbshape_mssql::{MssqlConnection, parse_server_version};

#[test]
fn server_versions_parse_from_product_version() {
    let version = parse_server_version("16.0.4135.4").expect("version");
    assert_eq!((version.major, version.minor, version.patch), (16, 0, 4135));

    let version = parse_server_version("15.0 (RTM)").expect("version");
    assert_eq!((version.major, version.minor, version.patch), (15, 0, 0));

    assert!(parse_server_version("unknown").is_none());
}

#[test]
fn connect_requires_a_user() {
    let config = ConnectionConfig {
        database: "app".to_string(),
        ..ConnectionConfig::default()
    };

    let Err(error) = MssqlConnection::connect(&config) else {
        panic!("connect without a user should fail");
    };
    assert!(matches!(
        error,
        Error::Execute(ExecutionError::Connection { .. })
    ));
    assert_eq!(error.category(), "execute");
    assert!(error.to_string().contains("mssql user is required"));
}

#[test]
#[ignore = "requires sql server container runtime"]
fn install_round_trip_against_live_server() {
    let connection = MssqlConnection::connect(&live_connection()).expect("connect");
    let source = "CREATE TABLE DbshapeProbe ([ID] int IDENTITY, [Name] varchar(32))\nGO\nCREATE VIEW DbshapeProbeNames AS SELECT [Name] FROM DbshapeProbe\nGO\n";
    let installer = Installer::new(&connection, InstallOptions::new("dbshape-probe"));

    installer.install_sql(source).expect("first install");
    let second = installer.install_sql(source).expect("second install");
    assert!(second.statements.is_empty(), "reinstall should run no DDL");

    let count = connection
        .scalar::<i64>(
            "SELECT COUNT(*) FROM sys.objects WHERE name = @P1",
            &["DbshapeProbeNames".into()],
        )
        .expect("query");
    assert_eq!(count, Some(1));

    installer.uninstall().expect("uninstall");
}

fn live_connection() -> ConnectionConfig {
    let host = std::env::var("DBSHAPE_MSSQL_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("DBSHAPE_MSSQL_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(1433);
    let user = std::env::var("DBSHAPE_MSSQL_USER").unwrap_or_else(|_| "sa".to_string());
    let password =
        std::env::var("DBSHAPE_MSSQL_PASSWORD").unwrap_or_else(|_| "Passw0rd!".to_string());
    let database = std::env::var("DBSHAPE_MSSQL_DATABASE").unwrap_or_else(|_| "master".to_string());

    ConnectionConfig {
        host: Some(host),
        port: Some(port),
        user: Some(user),
        password: Some(password),
        database,
        ..ConnectionConfig::default()
    }
}
