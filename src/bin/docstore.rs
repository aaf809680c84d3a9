//! PhotonDB document store command-line tool
//!
//! Manages the tables, indexes and documents of a database directory:
//! - Database bootstrap (init, info, stats)
//! - Table operations (create, drop, list)
//! - Index operations (create, drop, list)
//! - Document operations (put, get, delete, list)
//!
//! # Examples
//!
//! ```bash
//! # Create a database and a table with an index
//! docstore --data-dir data/app init
//! docstore --data-dir data/app table create users
//! docstore --data-dir data/app index create users email
//!
//! # Store and read a document
//! docstore --data-dir data/app doc put users u1 '{"email":"ada@example.com"}'
//! docstore --data-dir data/app doc get users u1
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use photon_docstore::{metrics, Database, DatabaseOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// PhotonDB document store
#[derive(Parser, Debug)]
#[command(name = "docstore")]
#[command(version = photon_docstore::VERSION)]
#[command(about = "PhotonDB document store - tables, indexes and documents", long_about = None)]
struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,

    /// Database directory path
    #[arg(
        long,
        global = true,
        default_value = "data/docstore",
        env = "DOCSTORE_DATA_DIR"
    )]
    data_dir: PathBuf,

    /// Engine options file (TOML)
    #[arg(long, global = true, env = "DOCSTORE_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Log directory path
    #[arg(long, global = true, default_value = "logs", env = "DOCSTORE_LOG_DIR")]
    log_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn", env = "RUST_LOG")]
    log_level: String,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database directory if needed
    Init,

    /// Show tables, indexes and document counts
    Info,

    /// Table operations
    Table {
        #[command(subcommand)]
        command: TableCommands,
    },

    /// Index operations
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Document operations
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },

    /// Engine options
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },

    /// Show storage statistics and metrics
    Stats,
}

#[derive(Subcommand, Debug)]
enum TableCommands {
    /// Create a new table
    Create {
        /// Table name
        name: String,
    },

    /// Drop a table with all its indexes and documents
    Drop {
        /// Table name
        name: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// List all tables
    List,
}

#[derive(Subcommand, Debug)]
enum IndexCommands {
    /// Create an index on a table
    Create {
        /// Table name
        table: String,
        /// Index name
        name: String,
    },

    /// Drop an index
    Drop {
        /// Table name
        table: String,
        /// Index name
        name: String,
        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// List the indexes of a table
    List {
        /// Table name
        table: String,
    },
}

#[derive(Subcommand, Debug)]
enum DocCommands {
    /// Insert or replace a document
    Put {
        table: String,
        key: String,
        /// Document body (JSON)
        value: String,
    },

    /// Print a document
    Get { table: String, key: String },

    /// Delete a document
    Delete { table: String, key: String },

    /// List documents in key order
    List {
        table: String,
        /// First key to list
        #[arg(long, default_value = "")]
        start: String,
        /// Maximum number of documents
        #[arg(short, long, default_value = "100")]
        limit: usize,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Print the effective engine options as TOML
    Show,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let _guard = setup_logging(&cli)?;

    let options = load_options(cli.config.as_deref())?;

    match cli.command {
        Commands::Init => init_command(&cli.data_dir, options),
        Commands::Info => info_command(&cli.data_dir, options),
        Commands::Table { command } => table_command(&cli.data_dir, options, command),
        Commands::Index { command } => index_command(&cli.data_dir, options, command),
        Commands::Doc { command } => doc_command(&cli.data_dir, options, command),
        Commands::Config {
            command: ConfigCommands::Show,
        } => {
            print!("{}", toml::to_string_pretty(&options)?);
            Ok(())
        }
        Commands::Stats => stats_command(&cli.data_dir, options),
    }
}

/// Setup logging with rolling files and console output
fn setup_logging(cli: &Cli) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all(&cli.log_dir)
        .with_context(|| format!("failed to create log directory {}", cli.log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, &cli.log_dir, "docstore.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let log_level = cli
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::WARN);

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(!cli.no_color),
        )
        .with(fmt::layer().with_writer(file_writer).with_ansi(false))
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .init();

    Ok(guard)
}

/// Resolve engine options: defaults, then the optional file, then
/// `DOCSTORE_*` environment variables.
fn load_options(file: Option<&Path>) -> anyhow::Result<DatabaseOptions> {
    let mut builder =
        config::Config::builder().add_source(config::Config::try_from(&DatabaseOptions::default())?);
    if let Some(file) = file {
        builder = builder.add_source(config::File::from(file).required(true));
    }
    builder = builder.add_source(config::Environment::with_prefix("DOCSTORE").try_parsing(true));

    let options = builder
        .build()
        .context("failed to load engine options")?
        .try_deserialize()
        .context("invalid engine options")?;
    Ok(options)
}

fn open(data_dir: &Path, options: DatabaseOptions) -> anyhow::Result<Database> {
    Database::open_with_options(data_dir, options)
        .with_context(|| format!("failed to open database at {}", data_dir.display()))
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{} (yes/no): ", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("yes"))
}

fn init_command(data_dir: &Path, options: DatabaseOptions) -> anyhow::Result<()> {
    let db = open(data_dir, options)?;
    println!("✅ Database ready at {}", db.path().display());
    db.close()?;
    Ok(())
}

fn info_command(data_dir: &Path, options: DatabaseOptions) -> anyhow::Result<()> {
    let db = open(data_dir, options)?;
    let tables = db.tables();

    println!("Database: {}", db.path().display());
    println!("Tables: {}", tables.len());
    println!("───────────────────────────────");
    for name in tables {
        let Some(table) = db.table(name.as_str()) else {
            continue;
        };
        println!("  • {} ({} documents)", name, table.len());
        for index in table.indexes() {
            println!("      ↳ {}", index);
        }
    }
    db.close()?;
    Ok(())
}

fn table_command(
    data_dir: &Path,
    options: DatabaseOptions,
    command: TableCommands,
) -> anyhow::Result<()> {
    let db = open(data_dir, options)?;

    match command {
        TableCommands::Create { name } => {
            db.create_table(&name)?;
            println!("✅ Created table '{}'", name);
        }
        TableCommands::Drop { name, force } => {
            if !force && !confirm(&format!("Drop table '{}'?", name))? {
                println!("Aborted.");
                return Ok(());
            }
            db.drop_table(&name)?;
            println!("✅ Dropped table '{}'", name);
        }
        TableCommands::List => {
            let tables = db.tables();
            if tables.is_empty() {
                println!("No tables.");
            } else {
                for table in tables {
                    println!("{}", table);
                }
            }
        }
    }
    db.close()?;
    Ok(())
}

fn index_command(
    data_dir: &Path,
    options: DatabaseOptions,
    command: IndexCommands,
) -> anyhow::Result<()> {
    let db = open(data_dir, options)?;

    match command {
        IndexCommands::Create { table, name } => {
            db.create_index(&table, &name)?;
            println!("✅ Created index '{}' on '{}'", name, table);
        }
        IndexCommands::Drop { table, name, force } => {
            if !force && !confirm(&format!("Drop index '{}' on '{}'?", name, table))? {
                println!("Aborted.");
                return Ok(());
            }
            db.drop_index(&table, &name)?;
            println!("✅ Dropped index '{}' on '{}'", name, table);
        }
        IndexCommands::List { table } => {
            let handle = db
                .table(&table)
                .with_context(|| format!("table '{}' not found", table))?;
            let indexes = handle.indexes();
            if indexes.is_empty() {
                println!("No indexes on '{}'", table);
            } else {
                for index in indexes {
                    println!("{}", index);
                }
            }
        }
    }
    db.close()?;
    Ok(())
}

fn doc_command(data_dir: &Path, options: DatabaseOptions, command: DocCommands) -> anyhow::Result<()> {
    let db = open(data_dir, options)?;
    let table_handle = |name: &str| {
        db.table(name)
            .with_context(|| format!("table '{}' not found", name))
    };

    match command {
        DocCommands::Put { table, key, value } => {
            serde_json::from_str::<serde_json::Value>(&value)
                .with_context(|| format!("document for '{}' is not valid JSON", key))?;
            table_handle(&table)?.set(key.as_bytes(), value.as_bytes())?;
            info!(table = %table, key = %key, "Stored document");
            println!("✅ Stored '{}' in '{}'", key, table);
        }
        DocCommands::Get { table, key } => match table_handle(&table)?.get(key.as_bytes())? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("Document '{}' not found", key),
        },
        DocCommands::Delete { table, key } => {
            if table_handle(&table)?.delete(key.as_bytes())? {
                println!("✅ Deleted '{}' from '{}'", key, table);
            } else {
                println!("Document '{}' not found", key);
            }
        }
        DocCommands::List { table, start, limit } => {
            let rows = table_handle(&table)?.scan(start.as_bytes(), limit)?;
            if rows.is_empty() {
                println!("No documents.");
            }
            for (key, value) in rows {
                println!(
                    "{}\t{}",
                    String::from_utf8_lossy(&key),
                    String::from_utf8_lossy(&value)
                );
            }
        }
    }
    db.close()?;
    Ok(())
}

fn stats_command(data_dir: &Path, options: DatabaseOptions) -> anyhow::Result<()> {
    let db = open(data_dir, options)?;

    for name in db.tables() {
        let Some(table) = db.table(name.as_str()) else {
            continue;
        };
        let stats = table.storage().stats();
        println!(
            "{}: {} keys, {} bytes allocated, cache hit rate {:.1}%",
            name,
            stats.key_count,
            stats.total_allocated,
            stats.cache_hit_rate * 100.0
        );
        for index_name in table.indexes() {
            if let Some(index) = table.index(index_name.as_str()) {
                let stats = index.storage().stats();
                println!(
                    "  {}: {} keys, {} bytes allocated",
                    index_name, stats.key_count, stats.total_allocated
                );
            }
        }
    }
    println!();
    print!("{}", metrics::export());

    db.close()?;
    Ok(())
}
