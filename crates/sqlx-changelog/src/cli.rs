#![allow(clippy::struct_excessive_bools, clippy::too_many_lines)]
use crate::{prelude::*, status::StatusRow, Changelog, DEFAULT_CHANGELOG_TABLE, DEFAULT_MIGRATIONS_DIR};
use clap::Parser;
use comfy_table::{Cell, CellAlignment, ContentArrangement, Table};
use log::LevelFilter;
use sqlx::{ConnectOptions, Connection, Database};
use std::{
    io::{self, BufRead, Write},
    path::PathBuf,
    process,
    time::Duration,
};
use tracing_subscriber::{
    fmt::format::FmtSpan, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
    EnvFilter,
};

#[derive(Debug, clap::Parser)]
pub struct Migrate {
    /// Disable colors in messages.
    #[arg(long, global = true)]
    no_colors: bool,
    /// Enable the logging of tracing spans.
    #[arg(long, global = true)]
    verbose: bool,
    /// Do not ask for confirmation before reverting migrations.
    #[arg(long = "do-as-i-say", visible_alias = "force", global = true)]
    force: bool,
    /// Log all SQL statements.
    #[arg(long, global = true)]
    log_statements: bool,
    /// Database URL, if not given the `DATABASE_URL` environment variable will be used.
    #[arg(long, visible_alias = "db-url", global = true)]
    database_url: Option<String>,
    /// The name of the changelog table.
    #[arg(long, default_value = DEFAULT_CHANGELOG_TABLE, global = true)]
    changelog_table: String,
    /// The directory containing the migration files.
    #[arg(long, default_value = DEFAULT_MIGRATIONS_DIR, global = true)]
    migrations_dir: PathBuf,
    #[command(subcommand)]
    operation: Operation,
}

#[derive(Debug, clap::Subcommand)]
enum Operation {
    /// Create the changelog table.
    Init {},
    /// Apply all pending migrations, up to the given one if `--to` is set.
    #[command(visible_aliases = ["migrate"])]
    Up {
        /// Apply migrations up to and including this id.
        #[arg(long)]
        to: Option<MigrationId>,
        /// Apply only the migration with this id.
        #[arg(long)]
        only: Option<MigrationId>,
        /// Mark migrations as applied without executing their SQL.
        #[arg(long)]
        changelog_only: bool,
    },
    /// Revert the last applied migration, or down to the given one if `--to` is set.
    #[command(visible_aliases = ["revert"])]
    Down {
        /// Revert migrations down to and including this id.
        #[arg(long)]
        to: Option<MigrationId>,
        /// Revert only the migration with this id.
        #[arg(long)]
        only: Option<MigrationId>,
        /// Remove migrations from the changelog without executing their SQL.
        #[arg(long)]
        changelog_only: bool,
        /// How to handle migrations in the changelog that have no local file.
        #[arg(long, value_enum, default_value_t = RemoteOnlyPolicy::Abort)]
        remote_only: RemoteOnlyPolicy,
    },
    /// List all migrations.
    #[command(visible_aliases = ["list", "ls"])]
    Status {},
}

/// Run a CLI application that manages the migrations of a directory.
///
/// # Panics
///
/// This functon assumes that it has control over the entire application.
///
/// It will happily alter global state (tracing), or terminate the process.
pub fn run<DB>()
where
    DB: Database,
    DB::Connection: Changelog + Connection<Database = DB>,
{
    // A missing `.env` file is fine.
    dotenv::dotenv().ok();

    let migrate = Migrate::parse();
    setup_logging(&migrate);

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(error) => {
            tracing::error!(error = %error, "failed to start the async runtime");
            process::exit(1);
        }
    };

    runtime.block_on(execute::<DB>(migrate));
}

async fn execute<DB>(migrate: Migrate)
where
    DB: Database,
    DB::Connection: Changelog + Connection<Database = DB>,
{
    let mut migrator = setup_migrator::<DB>(&migrate).await;

    match &migrate.operation {
        Operation::Init {} => init(migrator).await,
        Operation::Up {
            to,
            only,
            changelog_only,
        } => {
            let selection = Selection {
                only: *only,
                to: *to,
                remote_only: RemoteOnlyPolicy::default(),
            };
            run_migrations(&mut migrator, Direction::Up, &selection, *changelog_only).await;
        }
        Operation::Down {
            to,
            only,
            changelog_only,
            remote_only,
        } => {
            if !migrate.force && !confirm() {
                tracing::warn!("rollback aborted");
                return;
            }

            let selection = Selection {
                only: *only,
                to: *to,
                remote_only: *remote_only,
            };
            run_migrations(&mut migrator, Direction::Down, &selection, *changelog_only).await;
        }
        Operation::Status {} => log_status(migrator).await,
    }
}

async fn init<DB>(mut migrator: Migrator<DB>)
where
    DB: Database,
    DB::Connection: Changelog + Connection<Database = DB>,
{
    if let Err(error) = migrator.init().await {
        tracing::error!(error = %error, "error creating the changelog table");
        process::exit(1);
    }
}

async fn run_migrations<DB>(
    migrator: &mut Migrator<DB>,
    direction: Direction,
    selection: &Selection,
    changelog_only: bool,
) where
    DB: Database,
    DB::Connection: Changelog + Connection<Database = DB>,
{
    match migrator.run(direction, selection, changelog_only).await {
        Ok(summary) if summary.is_up_to_date() => {
            eprintln!("your database is already up to date");
        }
        Ok(summary) => print_summary(&summary),
        Err(error) => {
            match direction {
                Direction::Up => tracing::error!(error = %error, "error applying migrations"),
                Direction::Down => tracing::error!(error = %error, "error reverting migrations"),
            }
            process::exit(1);
        }
    }
}

fn confirm() -> bool {
    eprint!("Are you sure? (yes/no) [no]: ");
    if io::stderr().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => answer.trim() == "yes",
        Err(error) => {
            tracing::error!(error = %error, "failed to read the answer");
            false
        }
    }
}

async fn log_status<DB>(mut migrator: Migrator<DB>)
where
    DB: Database,
    DB::Connection: Changelog + Connection<Database = DB>,
{
    let status = match migrator.status().await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(error = %error, "error retrieving migration status");
            process::exit(1);
        }
    };

    println!("{}", status_table(&status));
}

fn status_table(rows: &[StatusRow]) -> Table {
    let mut table = Table::new();

    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(Vec::from([
            Cell::new("Id").set_alignment(CellAlignment::Center),
            Cell::new("Version").set_alignment(CellAlignment::Center),
            Cell::new("Applied At").set_alignment(CellAlignment::Center),
            Cell::new("Description").set_alignment(CellAlignment::Center),
            Cell::new("Status").set_alignment(CellAlignment::Center),
        ]));

    for row in rows {
        table.add_row(row.cells().map(Cell::new));
    }

    table
}

fn print_summary(summary: &MigrationSummary) {
    let mut table = Table::new();

    let header = match summary.direction {
        Direction::Up => "Applied Migrations",
        Direction::Down => "Reverted Migrations",
    };

    table
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(Vec::from([
            Cell::new(header).set_alignment(CellAlignment::Center),
            Cell::new("Count").set_alignment(CellAlignment::Center),
        ]));

    let ids = summary
        .migrations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    table.add_row(Vec::from([
        Cell::new(ids).set_alignment(CellAlignment::Center),
        Cell::new(summary.count()).set_alignment(CellAlignment::Center),
    ]));

    eprintln!("{}", table);
}

async fn setup_migrator<DB>(migrate: &Migrate) -> Migrator<DB>
where
    DB: Database,
    DB::Connection: Changelog + Connection<Database = DB>,
{
    let db_url = match &migrate.database_url {
        Some(s) => s.clone(),
        None => {
            if let Ok(url) = std::env::var("DATABASE_URL") {
                url
            } else {
                tracing::error!("`DATABASE_URL` environment variable or `--database-url` argument is required");
                process::exit(1);
            }
        }
    };

    let mut options = match db_url.parse::<<DB::Connection as Connection>::Options>() {
        Ok(opts) => opts,
        Err(err) => {
            tracing::error!(error = %err, "invalid database URL");
            process::exit(1);
        }
    };

    options = if migrate.log_statements {
        options
            .log_statements(LevelFilter::Info)
            .log_slow_statements(LevelFilter::Warn, Duration::from_secs(1))
    } else {
        options.disable_statement_logging()
    };

    let migrator_options = MigratorOptions::new(&migrate.migrations_dir)
        .with_changelog_table(migrate.changelog_table.clone());

    match Migrator::connect_with(&options, migrator_options).await {
        Ok(mig) => mig,
        Err(err) => {
            tracing::error!(error = %err, "failed to create database connection");
            process::exit(1);
        }
    }
}

fn setup_logging(migrate: &Migrate) {
    let format = tracing_subscriber::fmt::format().with_ansi(colors(migrate));

    let verbose = migrate.verbose;

    let span_events = if verbose {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::CLOSE
    };

    let registry = tracing_subscriber::registry();

    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => EnvFilter::default().add_directive(tracing::Level::INFO.into()),
    };

    if verbose {
        registry
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_span_events(span_events)
                    .event_format(format.pretty()),
            )
            .init();
    } else {
        registry
            .with(env_filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(io::stderr)
                    .with_span_events(span_events)
                    .event_format(format),
            )
            .init();
    }
}

fn colors(matches: &Migrate) -> bool {
    if matches.no_colors {
        return false;
    }

    atty::is(atty::Stream::Stdout)
}
