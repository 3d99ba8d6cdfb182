mod error_presentation;

use std::{
    fs,
    io::{self, Read},
    path::PathBuf,
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand};
use dbshape_core::{
    Classifier, ConnectionConfig, DEFAULT_REGISTRY_TABLE, InstallMode, InstallOptions,
    InstallReport, Installer, SchemaObject,
};
use dbshape_mssql::MssqlConnection;
use error_presentation::{CliError, CliResult, render_runtime_error};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const TRUST_CERT_KEY: &str = "mssql.trust_cert";

/// Declarative schema installer for SQL Server.
#[derive(Parser)]
#[command(name = "dbshape", version, about)]
struct Cli {
    /// Raise log verbosity (-v info, -vv debug). RUST_LOG overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring a schema group in line with the given SQL files
    Install {
        #[command(flatten)]
        target: TargetArgs,

        /// Run everything inside a rolled-back transaction and print the script
        #[arg(long)]
        dry_run: bool,

        /// Object source files, read in order; stdin when omitted
        files: Vec<PathBuf>,
    },
    /// Show what an install would drop, alter and create
    Plan {
        #[command(flatten)]
        target: TargetArgs,

        /// Object source files, read in order; stdin when omitted
        files: Vec<PathBuf>,
    },
    /// Drop everything a schema group installed
    Uninstall {
        #[command(flatten)]
        target: TargetArgs,

        /// Run everything inside a rolled-back transaction and print the script
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// Database server host
    #[arg(long, default_value = "localhost")]
    server: String,

    /// Database server port
    #[arg(long, default_value_t = 1433)]
    port: u16,

    /// Named instance; replaces the port when set
    #[arg(long)]
    instance: Option<String>,

    /// Login name
    #[arg(short, long)]
    user: Option<String>,

    /// Login password
    #[arg(short, long, env = "DBSHAPE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Target database
    #[arg(short, long)]
    database: String,

    /// Verify the server certificate instead of trusting it
    #[arg(long)]
    no_trust_cert: bool,

    /// Schema group that owns the installed objects
    #[arg(short, long)]
    group: String,

    /// Table that records what each group installed
    #[arg(long, default_value = DEFAULT_REGISTRY_TABLE)]
    registry_table: String,
}

impl TargetArgs {
    fn connection_config(&self) -> ConnectionConfig {
        let mut config = ConnectionConfig {
            host: Some(self.server.clone()),
            port: Some(self.port),
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            ..ConnectionConfig::default()
        };
        if let Some(instance) = &self.instance {
            config
                .extra
                .insert("mssql.instance".to_string(), instance.clone());
        }
        if self.no_trust_cert {
            config
                .extra
                .insert(TRUST_CERT_KEY.to_string(), "false".to_string());
        }
        config
    }

    fn install_options(&self, dry_run: bool) -> InstallOptions {
        let mode = if dry_run {
            InstallMode::DryRun
        } else {
            InstallMode::Apply
        };
        InstallOptions::new(self.group.as_str())
            .with_mode(mode)
            .with_registry_table(self.registry_table.as_str())
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("{}", render_runtime_error(error));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let fallback = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(fmt::layer().with_writer(io::stderr))
        .init();
}

fn run(command: Command) -> CliResult<()> {
    match command {
        Command::Install {
            target,
            dry_run,
            files,
        } => {
            // Parse before connecting so malformed input never needs a server.
            let objects = read_objects(&files)?;
            let connection = MssqlConnection::connect(&target.connection_config())?;
            let report = Installer::new(&connection, target.install_options(dry_run))
                .install(objects)?;
            print_report(&report);
        }
        Command::Plan { target, files } => {
            let objects = read_objects(&files)?;
            let connection = MssqlConnection::connect(&target.connection_config())?;
            let plan = Installer::new(&connection, target.install_options(false)).plan(objects)?;
            if plan.is_empty() {
                println!("no changes");
            }
            for line in plan.summary() {
                println!("{line}");
            }
        }
        Command::Uninstall { target, dry_run } => {
            let connection = MssqlConnection::connect(&target.connection_config())?;
            let report = Installer::new(&connection, target.install_options(dry_run)).uninstall()?;
            print_report(&report);
        }
    }
    Ok(())
}

fn read_objects(files: &[PathBuf]) -> CliResult<Vec<SchemaObject>> {
    let source = read_source(files)?;
    if source.trim().is_empty() {
        return Err(CliError::MissingInput);
    }
    Ok(Classifier::standard().parse_objects(&source).map_err(dbshape_core::Error::from)?)
}

fn read_source(files: &[PathBuf]) -> CliResult<String> {
    if files.is_empty() {
        let mut source = String::new();
        io::stdin()
            .read_to_string(&mut source)
            .map_err(CliError::ReadStdin)?;
        return Ok(source);
    }

    let mut batches = Vec::with_capacity(files.len());
    for path in files {
        let text = fs::read_to_string(path).map_err(|source| CliError::ReadFile {
            path: path.clone(),
            source,
        })?;
        batches.push(text);
    }
    // A file never continues a batch started in the previous one.
    Ok(batches.join("\nGO\n"))
}

fn print_report(report: &InstallReport) {
    if report.mode == InstallMode::DryRun {
        print!("{}", report.script());
        return;
    }
    if report.is_empty() {
        println!("no changes");
        return;
    }
    println!(
        "dropped {}, altered {} tables, created {}, registry rows changed {}",
        report.dropped.len(),
        report.modified_tables.len(),
        report.created.len(),
        report.registry_changes
    );
}
