//! Dialect abstraction: the native connection handle and the per-dialect driver.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use super::error::{DatabaseError, Result};
use super::mysql::MySqlDriver;
use super::postgres::PostgresDriver;
use super::settings::{ClientSettings, DEFAULT_PAGE_SIZE};
use super::types::{
    ColumnInfo, ConnectionConfig, Dialect, ExecuteResult, IndexInfo, QueryResult, TableAlteration,
    TableDataRequest, TableInfo,
};

/// Open handle to a database, backed by a native connection pool.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a statement that returns rows.
    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Run a statement that returns no rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult>;

    async fn ping(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// Everything the manager needs from one SQL dialect.
///
/// Drivers are stateless; every method works against the connection handed
/// in, and the builders only render SQL text.
#[async_trait]
pub trait Driver: Send + Sync {
    fn dialect(&self) -> Dialect;

    fn default_port(&self) -> u16 {
        self.dialect().default_port()
    }

    /// Open a pool against `config` and verify it with a liveness probe.
    async fn connect(
        &self,
        config: &ConnectionConfig,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn Connection>>;

    async fn list_databases(&self, conn: &dyn Connection) -> Result<Vec<String>>;

    async fn list_tables(&self, conn: &dyn Connection, database: &str) -> Result<Vec<TableInfo>>;

    async fn list_columns(
        &self,
        conn: &dyn Connection,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>>;

    async fn list_indexes(
        &self,
        conn: &dyn Connection,
        database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>>;

    fn build_table_data_query(&self, req: &TableDataRequest, primary_key: &str) -> String;

    fn build_count_query(&self, database: &str, table: &str, filters: &str) -> String;

    fn build_alter_table(
        &self,
        _database: &str,
        _table: &str,
        _alteration: &TableAlteration,
    ) -> Result<Vec<String>> {
        Err(DatabaseError::Unsupported {
            operation: "alter table",
            dialect: self.dialect(),
        })
    }

    fn build_truncate(&self, database: &str, table: &str) -> String;

    fn build_drop(&self, database: &str, table: &str) -> String;

    fn build_insert(&self, database: &str, table: &str, columns: &[String]) -> String;

    /// SET values bind first, the primary key value last.
    fn build_update(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        columns: &[String],
    ) -> String;

    fn build_delete(&self, database: &str, table: &str, primary_key: &str) -> String;

    fn build_batch_delete(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        count: usize,
    ) -> String;

    /// Wrap an identifier in the dialect's quote characters. Embedded quote
    /// characters are not escaped.
    fn quote_identifier(&self, name: &str) -> String;
}

/// Drivers available to the manager, keyed by dialect.
#[derive(Clone)]
pub struct DriverRegistry {
    drivers: HashMap<Dialect, Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn empty() -> Self {
        Self {
            drivers: HashMap::new(),
        }
    }

    /// Registry with the MySQL and PostgreSQL drivers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(MySqlDriver));
        registry.register(Arc::new(PostgresDriver));
        registry
    }

    /// Add or replace the driver for its dialect.
    pub fn register(&mut self, driver: Arc<dyn Driver>) {
        self.drivers.insert(driver.dialect(), driver);
    }

    /// Select the driver for a profile's `type` tag.
    pub fn resolve(&self, tag: &str) -> Result<Arc<dyn Driver>> {
        let dialect = Dialect::from_tag(tag)?;
        self.drivers
            .get(&dialect)
            .cloned()
            .ok_or_else(|| DatabaseError::UnsupportedDialect(tag.to_string()))
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Page number, page size and row offset for a table data request.
pub(crate) fn page_window(req: &TableDataRequest) -> (i64, i64, i64) {
    let page_size = if req.page_size <= 0 {
        DEFAULT_PAGE_SIZE
    } else {
        req.page_size
    };
    let page = req.page.max(1);
    (page, page_size, (page - 1).saturating_mul(page_size))
}

/// Number of pages needed for `total_rows`; `page_size` must be positive.
pub(crate) fn total_pages(total_rows: i64, page_size: i64) -> i64 {
    let total_rows = total_rows.max(0);
    total_rows / page_size + i64::from(total_rows % page_size != 0)
}

pub(crate) fn order_direction(dir: &str) -> &'static str {
    if dir.trim().eq_ignore_ascii_case("DESC") {
        "DESC"
    } else {
        "ASC"
    }
}

pub(crate) fn where_clause(filters: &str) -> String {
    let filters = filters.trim();
    if filters.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filters)
    }
}

/// Merge per-column index rows into one record per index.
///
/// Rows are `(index name, column, unique, primary)`. Index order follows the
/// first row seen for each name; column order follows the rows.
pub(crate) fn coalesce_index_rows<I>(rows: I) -> Vec<IndexInfo>
where
    I: IntoIterator<Item = (String, String, bool, bool)>,
{
    let mut indexes: Vec<IndexInfo> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (name, column, is_unique, is_primary) in rows {
        let pos = *positions.entry(name.clone()).or_insert_with(|| {
            indexes.push(IndexInfo {
                name,
                columns: Vec::new(),
                is_unique,
                is_primary,
            });
            indexes.len() - 1
        });
        indexes[pos].columns.push(column);
    }

    indexes
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Connection that answers every fetch with a canned result and records
    /// the statements it saw.
    pub struct StaticConnection {
        pub result: QueryResult,
        pub seen: Mutex<Vec<(String, Vec<Value>)>>,
    }

    impl StaticConnection {
        pub fn new(columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
            Self {
                result: QueryResult::new(columns.iter().map(|c| c.to_string()).collect(), rows),
                seen: Mutex::new(Vec::new()),
            }
        }

        pub fn statements(&self) -> Vec<(String, Vec<Value>)> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Connection for StaticConnection {
        async fn fetch(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
            self.seen
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(self.result.clone())
        }

        async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
            self.seen
                .lock()
                .unwrap()
                .push((sql.to_string(), params.to_vec()));
            Ok(ExecuteResult::default())
        }

        async fn ping(&self) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }
}
