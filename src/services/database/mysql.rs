//! MySQL dialect: sqlx pool connection, catalog introspection and SQL rendering.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::mysql::{MySqlArguments, MySqlConnectOptions, MySqlPoolOptions, MySqlRow, MySqlSslMode};
use sqlx::query::Query;
use sqlx::{Column, Executor, MySql, MySqlPool, Row, Statement, ValueRef};
use std::sync::Arc;

use super::driver::{
    Connection, Driver, coalesce_index_rows, order_direction, page_window, where_clause,
};
use super::error::{DatabaseError, Result};
use super::settings::ClientSettings;
use super::types::{
    ColumnInfo, ConnectionConfig, Dialect, ExecuteResult, IndexInfo, QueryResult, TableAlteration,
    TableDataRequest, TableInfo,
};
use super::values::{
    Param, bytes_to_value, date_to_value, datetime_to_value, decimal_to_value, decode_first,
    float_to_value, time_to_value, utc_to_value,
};

/// Live MySQL pool.
pub struct MySqlConnection {
    pool: MySqlPool,
}

impl MySqlConnection {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    async fn columns_of(&self, sql: &str) -> Vec<String> {
        match self.pool.prepare(sql).await {
            Ok(statement) => statement
                .columns()
                .iter()
                .map(|c| c.name().to_string())
                .collect(),
            Err(e) => {
                tracing::debug!("Could not describe result columns: {}", e);
                Vec::new()
            }
        }
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    async fn fetch(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let rows = if params.is_empty() {
            self.pool.fetch_all(sql).await?
        } else {
            bind_all(sqlx::query(sql), params)
                .fetch_all(&self.pool)
                .await?
        };

        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self.columns_of(sql).await,
        };
        let rows = rows.iter().map(decode_row).collect();
        Ok(QueryResult::new(columns, rows))
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecuteResult> {
        let result = if params.is_empty() {
            self.pool.execute(sql).await?
        } else {
            bind_all(sqlx::query(sql), params)
                .execute(&self.pool)
                .await?
        };
        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_id(),
        })
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

fn bind_all<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    params: &[Value],
) -> Query<'q, MySql, MySqlArguments> {
    for value in params {
        query = match Param::from(value) {
            Param::Null => query.bind(None::<String>),
            Param::Bool(b) => query.bind(b),
            Param::Int(i) => query.bind(i),
            Param::UInt(u) => query.bind(u),
            Param::Float(f) => query.bind(f),
            Param::Text(s) => query.bind(s),
        };
    }
    query
}

fn decode_row(row: &MySqlRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|index| decode_cell(row, index))
        .collect()
}

fn decode_cell(row: &MySqlRow, index: usize) -> Value {
    match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(_) => {}
        Err(e) => {
            tracing::debug!("Failed to read column {}: {}", index, e);
            return Value::Null;
        }
    }

    decode_first!(row, index,
        String => Value::String,
        Vec<u8> => bytes_to_value,
        i64 => Value::from,
        u64 => Value::from,
        f64 => float_to_value,
        f32 => |v: f32| float_to_value(f64::from(v)),
        bool => Value::Bool,
        Decimal => decimal_to_value,
        NaiveDateTime => datetime_to_value,
        DateTime<Utc> => utc_to_value,
        NaiveDate => date_to_value,
        NaiveTime => time_to_value,
        Value => |v: Value| v,
    );

    tracing::debug!(
        "Unsupported MySQL column type {} at {}",
        row.columns()[index].type_info(),
        index
    );
    Value::Null
}

/// MySQL driver. Identifiers are qualified as `` `db`.`table` `` and
/// parameters use `?`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlDriver;

impl MySqlDriver {
    fn table_ref(&self, database: &str, table: &str) -> String {
        format!(
            "{}.{}",
            self.quote_identifier(database),
            self.quote_identifier(table)
        )
    }

    fn column_definition(&self, col: &ColumnInfo) -> String {
        let null = if col.nullable { "NULL" } else { "NOT NULL" };
        let mut definition = format!("{} {}", col.data_type.trim(), null);
        if !col.default.is_empty() {
            definition.push_str(&format!(" DEFAULT '{}'", col.default));
        }
        if !col.extra.trim().is_empty() {
            definition.push(' ');
            definition.push_str(col.extra.trim());
        }
        definition
    }

    fn connect_options(&self, config: &ConnectionConfig) -> MySqlConnectOptions {
        let port = if config.port == 0 {
            self.default_port()
        } else {
            config.port
        };

        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(port)
            .username(&config.user)
            .password(&config.password);

        if !config.database.is_empty() {
            options = options.database(&config.database);
        }

        if config.use_ssl {
            options = options.ssl_mode(config.ssl().to_mysql_ssl_mode());
            if !config.ssl_ca_cert.is_empty() {
                options = options.ssl_ca(&config.ssl_ca_cert);
            }
            if !config.ssl_client_cert.is_empty() {
                options = options.ssl_client_cert(&config.ssl_client_cert);
            }
            if !config.ssl_client_key.is_empty() {
                options = options.ssl_client_key(&config.ssl_client_key);
            }
        } else {
            options = options.ssl_mode(MySqlSslMode::Disabled);
        }

        options
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn connect(
        &self,
        config: &ConnectionConfig,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn Connection>> {
        let target = config.address();
        let options = self.connect_options(config);

        let pool = match tokio::time::timeout(
            settings.connect_timeout,
            MySqlPoolOptions::new()
                .max_connections(settings.max_connections)
                .min_connections(0)
                .idle_timeout(Some(settings.idle_timeout))
                .max_lifetime(Some(settings.max_lifetime))
                .acquire_timeout(settings.connect_timeout)
                .connect_with(options),
        )
        .await
        {
            Ok(Ok(pool)) => pool,
            Ok(Err(source)) => return Err(DatabaseError::Connect { target, source }),
            Err(_) => {
                return Err(DatabaseError::Timeout {
                    operation: "connect",
                    timeout: settings.connect_timeout,
                });
            }
        };

        let probe = tokio::time::timeout(
            settings.ping_timeout,
            sqlx::query("SELECT 1").execute(&pool),
        )
        .await;
        match probe {
            Ok(Ok(_)) => {}
            Ok(Err(source)) => {
                pool.close().await;
                return Err(DatabaseError::Ping { target, source });
            }
            Err(_) => {
                pool.close().await;
                return Err(DatabaseError::Timeout {
                    operation: "ping",
                    timeout: settings.ping_timeout,
                });
            }
        }

        tracing::info!("Connected to MySQL at {}", target);
        Ok(Arc::new(MySqlConnection::new(pool)))
    }

    async fn list_databases(&self, conn: &dyn Connection) -> Result<Vec<String>> {
        let result = conn.fetch("SHOW DATABASES", &[]).await?;
        Ok(result
            .rows
            .iter()
            .filter_map(|row| row.first())
            .map(|cell| match cell {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect())
    }

    async fn list_tables(&self, conn: &dyn Connection, database: &str) -> Result<Vec<TableInfo>> {
        let sql = format!(
            "SHOW TABLE STATUS FROM {}",
            self.quote_identifier(database)
        );
        let result = conn.fetch(&sql, &[]).await?;
        Ok(result
            .records()
            .map(|r| TableInfo {
                name: r.text("Name"),
                engine: r.text("Engine"),
                row_count: r.int("Rows"),
                data_size: r.int("Data_length"),
                create_time: r.text("Create_time"),
            })
            .collect())
    }

    async fn list_columns(
        &self,
        conn: &dyn Connection,
        database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let sql = format!("SHOW FULL COLUMNS FROM {}", self.table_ref(database, table));
        let result = conn.fetch(&sql, &[]).await?;
        Ok(result
            .records()
            .map(|r| ColumnInfo {
                name: r.text("Field"),
                data_type: r.text("Type"),
                nullable: r.text("Null").eq_ignore_ascii_case("YES"),
                key: r.text("Key"),
                default: r.text("Default"),
                extra: r.text("Extra"),
                old_name: None,
            })
            .collect())
    }

    async fn list_indexes(
        &self,
        conn: &dyn Connection,
        database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>> {
        let sql = format!("SHOW INDEX FROM {}", self.table_ref(database, table));
        let result = conn.fetch(&sql, &[]).await?;
        Ok(coalesce_index_rows(result.records().map(|r| {
            let name = r.text("Key_name");
            let is_primary = name == "PRIMARY";
            (name, r.text("Column_name"), r.int("Non_unique") == 0, is_primary)
        })))
    }

    fn build_table_data_query(&self, req: &TableDataRequest, primary_key: &str) -> String {
        let (_, page_size, offset) = page_window(req);
        let order_by = if req.order_by.is_empty() {
            primary_key
        } else {
            req.order_by.as_str()
        };

        let mut query = format!(
            "SELECT * FROM {}{}",
            self.table_ref(&req.database, &req.table),
            where_clause(&req.filters)
        );
        if !order_by.is_empty() {
            query.push_str(&format!(
                " ORDER BY {} {}",
                self.quote_identifier(order_by),
                order_direction(&req.order_dir)
            ));
        }
        query.push_str(&format!(" LIMIT {} OFFSET {}", page_size, offset));
        query
    }

    fn build_count_query(&self, database: &str, table: &str, filters: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            self.table_ref(database, table),
            where_clause(filters)
        )
    }

    fn build_alter_table(
        &self,
        database: &str,
        table: &str,
        alteration: &TableAlteration,
    ) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        let mut table = table.to_string();

        let rename_to = alteration.rename_to.trim();
        if !rename_to.is_empty() && rename_to != table {
            statements.push(format!(
                "ALTER TABLE {} RENAME TO {}",
                self.table_ref(database, &table),
                self.quote_identifier(rename_to)
            ));
            table = rename_to.to_string();
        }

        let target = self.table_ref(database, &table);

        for col in &alteration.drop_columns {
            statements.push(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                target,
                self.quote_identifier(col)
            ));
        }

        for col in &alteration.add_columns {
            statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                target,
                self.quote_identifier(&col.name),
                self.column_definition(col)
            ));
        }

        for col in &alteration.modify_columns {
            let statement = match col.old_name.as_deref().filter(|old| *old != col.name) {
                Some(old) if !old.is_empty() => format!(
                    "ALTER TABLE {} CHANGE COLUMN {} {} {}",
                    target,
                    self.quote_identifier(old),
                    self.quote_identifier(&col.name),
                    self.column_definition(col)
                ),
                _ => format!(
                    "ALTER TABLE {} MODIFY COLUMN {} {}",
                    target,
                    self.quote_identifier(&col.name),
                    self.column_definition(col)
                ),
            };
            statements.push(statement);
        }

        Ok(statements)
    }

    fn build_truncate(&self, database: &str, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.table_ref(database, table))
    }

    fn build_drop(&self, database: &str, table: &str) -> String {
        format!("DROP TABLE {}", self.table_ref(database, table))
    }

    fn build_insert(&self, database: &str, table: &str, columns: &[String]) -> String {
        let quoted: Vec<_> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        let placeholders = vec!["?"; columns.len()];
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_ref(database, table),
            quoted.join(", "),
            placeholders.join(", ")
        )
    }

    fn build_update(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        columns: &[String],
    ) -> String {
        let sets: Vec<_> = columns
            .iter()
            .map(|c| format!("{} = ?", self.quote_identifier(c)))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.table_ref(database, table),
            sets.join(", "),
            self.quote_identifier(primary_key)
        )
    }

    fn build_delete(&self, database: &str, table: &str, primary_key: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = ?",
            self.table_ref(database, table),
            self.quote_identifier(primary_key)
        )
    }

    fn build_batch_delete(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        count: usize,
    ) -> String {
        let placeholders = vec!["?"; count];
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.table_ref(database, table),
            self.quote_identifier(primary_key),
            placeholders.join(", ")
        )
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name)
    }
}
