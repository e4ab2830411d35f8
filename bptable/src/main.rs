#![cfg_attr(test, allow(clippy::expect_used))]
// Forbid unwrap() in production code to prevent panics from corrupt data.
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
use bptable::config::EngineConfig;
use bptable::storage::{Aggregate, Database, DatabaseError, Table, TableError, Value};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "usage: bptable <command>

commands:
  tables                               list tables with their row counts
  schema <table>                       show the columns of a table
  get <table> <key>                    show the record stored under a key
  range <table> <start> <end>          show records with start <= key <= end
  aggregate <table> <column> <op>      sum, avg, min, max or count a column
  stats <table>                        show index order, height and length";

/// A parsed command line.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Tables,
    Schema { table: String },
    Get { table: String, key: String },
    Range { table: String, start: String, end: String },
    Aggregate { table: String, column: String, op: String },
    Stats { table: String },
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, CliError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        match args.as_slice() {
            ["tables"] => Ok(Self::Tables),
            ["schema", table] => Ok(Self::Schema {
                table: (*table).to_owned(),
            }),
            ["get", table, key] => Ok(Self::Get {
                table: (*table).to_owned(),
                key: (*key).to_owned(),
            }),
            ["range", table, start, end] => Ok(Self::Range {
                table: (*table).to_owned(),
                start: (*start).to_owned(),
                end: (*end).to_owned(),
            }),
            ["aggregate", table, column, op] => Ok(Self::Aggregate {
                table: (*table).to_owned(),
                column: (*column).to_owned(),
                op: (*op).to_owned(),
            }),
            ["stats", table] => Ok(Self::Stats {
                table: (*table).to_owned(),
            }),
            _ => Err(CliError::Usage),
        }
    }
}

#[derive(Debug)]
enum CliError {
    Usage,
    UnknownTable(String),
    Database(DatabaseError),
    Table(TableError),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Usage => f.write_str(USAGE),
            Self::UnknownTable(name) => write!(f, "no table named '{name}'"),
            Self::Database(e) => write!(f, "{e}"),
            Self::Table(e) => write!(f, "{e}"),
        }
    }
}

impl From<DatabaseError> for CliError {
    fn from(e: DatabaseError) -> Self {
        Self::Database(e)
    }
}

impl From<TableError> for CliError {
    fn from(e: TableError) -> Self {
        Self::Table(e)
    }
}

fn table<'a>(database: &'a Database, name: &str) -> Result<&'a Table, CliError> {
    database
        .get_table(name)
        .ok_or_else(|| CliError::UnknownTable(name.to_owned()))
}

/// Convert user text to a primary-key value of the table.
fn key(table: &Table, raw: &str) -> Result<Value, CliError> {
    Ok(table.schema().coerce(table.primary_key(), raw)?)
}

/// Execute `command` and render its output.
fn run(database: &Database, command: &Command) -> Result<Vec<String>, CliError> {
    let lines = match command {
        Command::Tables => database
            .list_tables()
            .into_iter()
            .filter_map(|name| database.get_table(name))
            .map(|table| format!("{}\t{} rows", table.name(), table.len()))
            .collect(),
        Command::Schema { table: name } => {
            let table = table(database, name)?;
            table
                .schema()
                .columns()
                .iter()
                .map(|column| {
                    let marker = if column.name == table.primary_key() {
                        "\tprimary key"
                    } else {
                        ""
                    };
                    format!("{}\t{}{marker}", column.name, column.column_type)
                })
                .collect()
        }
        Command::Get { table: name, key: raw } => {
            let table = table(database, name)?;
            table
                .select(&key(table, raw)?)
                .map(ToString::to_string)
                .into_iter()
                .collect()
        }
        Command::Range {
            table: name,
            start,
            end,
        } => {
            let table = table(database, name)?;
            let (start, end) = (key(table, start)?, key(table, end)?);
            table
                .select_range(&start, &end)
                .into_iter()
                .map(ToString::to_string)
                .collect()
        }
        Command::Aggregate {
            table: name,
            column,
            op,
        } => {
            let table = table(database, name)?;
            let op: Aggregate = op.parse()?;
            vec![table.aggregate(column, op)?.to_string()]
        }
        Command::Stats { table: name } => {
            let index = table(database, name)?.index();
            vec![
                format!("order\t{}", index.order()),
                format!("height\t{}", index.height()),
                format!("len\t{}", index.len()),
            ]
        }
    };
    Ok(lines)
}

fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bptable=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment variables
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    info!(
        data_directory = %config.data_directory.display(),
        database = %config.database,
        "opening database"
    );
    let database = match Database::open_with_order(
        &config.data_directory,
        &config.database,
        config.tree_order,
    ) {
        Ok(database) => database,
        Err(e) => {
            tracing::error!("Failed to open database: {e}");
            std::process::exit(1);
        }
    };

    match run(&database, &command) {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
        }
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }
}
