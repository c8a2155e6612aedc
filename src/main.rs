use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use dbdeck::database::{ConnectionConfig, DatabaseManager, QueryResult, TableDataRequest};
use dbdeck::storage::ConnectionStore;
use dbdeck::updates::UpdateChecker;

#[derive(Debug, Parser)]
#[command(name = "dbdeck", version, about = "MySQL and PostgreSQL client")]
struct Cli {
    /// Profile file to use instead of ~/.dbdeck/connections.json
    #[arg(long, global = true, env = "DBDECK_PROFILES")]
    profiles: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List saved connection profiles
    Profiles,
    /// Check that a profile can connect
    Test { profile: String },
    /// List databases on the server
    Databases { profile: String },
    /// List tables in a database
    Tables { profile: String, database: String },
    /// Show columns and indexes of a table
    Describe {
        profile: String,
        database: String,
        table: String,
    },
    /// Page through table rows
    Rows {
        profile: String,
        database: String,
        table: String,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = dbdeck::database::DEFAULT_PAGE_SIZE)]
        page_size: i64,
        #[arg(long)]
        order_by: Option<String>,
        #[arg(long)]
        desc: bool,
        /// Raw WHERE clause body
        #[arg(long = "where")]
        filters: Option<String>,
    },
    /// Run a SQL statement
    Query { profile: String, sql: String },
    /// Check for a newer release
    CheckUpdate,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("dbdeck=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = match &cli.profiles {
        Some(path) => ConnectionStore::new(path),
        None => ConnectionStore::open_default()?,
    };

    match cli.command {
        Command::Profiles => {
            let profiles = store.load_all().await?;
            if cli.json {
                return print_json(&profiles);
            }
            if profiles.is_empty() {
                println!("No saved connections in {}", store.path().display());
            }
            for profile in profiles {
                let config = &profile.config;
                let via = if config.use_ssh_tunnel {
                    format!(" via ssh {}", config.ssh_host)
                } else {
                    String::new()
                };
                println!(
                    "{}\t{}\t{}{}",
                    profile.name,
                    config.dialect().map(|d| d.to_string()).unwrap_or_default(),
                    config.address(),
                    via
                );
            }
        }
        Command::Test { profile } => {
            let config = load_profile(&store, &profile).await?;
            DatabaseManager::new()
                .test_connection(&config)
                .await
                .with_context(|| format!("connection test for '{profile}' failed"))?;
            println!("Connection '{}' OK", profile);
        }
        Command::Databases { profile } => {
            let manager = connect(&store, &profile).await?;
            let databases = manager.list_databases().await;
            manager.disconnect().await?;
            let databases = databases?;
            if cli.json {
                return print_json(&databases);
            }
            for db in databases {
                println!("{}", db.name);
            }
        }
        Command::Tables { profile, database } => {
            let manager = connect(&store, &profile).await?;
            let tables = manager.list_tables(&database).await;
            manager.disconnect().await?;
            let tables = tables?;
            if cli.json {
                return print_json(&tables);
            }
            for table in tables {
                println!(
                    "{}\t{}\t{} rows\t{} bytes\t{}",
                    table.name, table.engine, table.row_count, table.data_size, table.create_time
                );
            }
        }
        Command::Describe {
            profile,
            database,
            table,
        } => {
            let manager = connect(&store, &profile).await?;
            let details = manager.table_details(&database, &table).await;
            manager.disconnect().await?;
            let details = details?;
            if cli.json {
                return print_json(&details);
            }
            println!("{}.{}", database, details.name);
            for column in &details.columns {
                println!(
                    "  {}\t{}\t{}\t{}\t{}",
                    column.name,
                    column.data_type,
                    if column.nullable { "NULL" } else { "NOT NULL" },
                    column.key,
                    column.extra
                );
            }
            if !details.indexes.is_empty() {
                println!("Indexes:");
            }
            for index in &details.indexes {
                println!(
                    "  {}\t({}){}{}",
                    index.name,
                    index.columns.join(", "),
                    if index.is_primary { " PRIMARY" } else { "" },
                    if index.is_unique { " UNIQUE" } else { "" }
                );
            }
        }
        Command::Rows {
            profile,
            database,
            table,
            page,
            page_size,
            order_by,
            desc,
            filters,
        } => {
            let request = TableDataRequest {
                database,
                table,
                page,
                page_size,
                order_by: order_by.unwrap_or_default(),
                order_dir: if desc { "DESC" } else { "ASC" }.to_string(),
                filters: filters.unwrap_or_default(),
            };
            let manager = connect(&store, &profile).await?;
            let data = manager.table_data(&request).await;
            manager.disconnect().await?;
            let data = data?;
            if cli.json {
                return print_json(&data);
            }
            let columns = data.columns.iter().map(|c| c.name.clone()).collect();
            print_rows(&QueryResult::new(columns, data.rows));
            println!(
                "page {}/{} ({} rows total)",
                data.page, data.total_pages, data.total_rows
            );
        }
        Command::Query { profile, sql } => {
            let manager = connect(&store, &profile).await?;
            let result = manager.execute_query(&sql).await;
            manager.disconnect().await?;
            let result = result?;
            if cli.json {
                return print_json(&result);
            }
            print_rows(&result);
            println!("({} rows)", result.row_count);
        }
        Command::CheckUpdate => {
            let update = UpdateChecker::default().check_for_update().await?;
            if cli.json {
                return print_json(&update);
            }
            match update {
                Some(info) => {
                    println!(
                        "Update available: {} -> {}",
                        info.current_version, info.latest_version
                    );
                    println!("{}", info.release_url);
                }
                None => println!("dbdeck {} is up to date", env!("CARGO_PKG_VERSION")),
            }
        }
    }

    Ok(())
}

async fn load_profile(store: &ConnectionStore, name: &str) -> Result<ConnectionConfig> {
    let saved = store
        .get(name)
        .await
        .with_context(|| format!("failed to load profile from {}", store.path().display()))?;
    Ok(saved.config)
}

async fn connect(store: &ConnectionStore, name: &str) -> Result<DatabaseManager> {
    let config = load_profile(store, name).await?;
    let manager = DatabaseManager::new();
    manager
        .connect(config)
        .await
        .with_context(|| format!("failed to connect with profile '{name}'"))?;
    Ok(manager)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_rows(result: &QueryResult) {
    println!("{}", result.columns.join("\t"));
    for row in &result.rows {
        let cells: Vec<String> = row.iter().map(cell_text).collect();
        println!("{}", cells.join("\t"));
    }
}

fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
