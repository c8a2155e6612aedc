//! PostgreSQL dialect.
//!
//! A PostgreSQL connection is bound to one database, so table references are
//! unqualified and catalog queries look at the `public` schema.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::query::Query;
use sqlx::{Column, Executor, PgPool, Postgres, Row, Statement, ValueRef};
use std::sync::Arc;
use uuid::Uuid;

use super::driver::{
    Connection, Driver, coalesce_index_rows, order_direction, page_window, where_clause,
};
use super::error::{DatabaseError, Result};
use super::settings::ClientSettings;
use super::types::{
    ColumnInfo, ConnectionConfig, Dialect, ExecuteResult, IndexInfo, QueryResult,
    TableDataRequest, TableInfo,
};
use super::values::{
    Param, bytes_to_value, date_to_value, datetime_to_value, decimal_to_value, decode_first,
    float_to_value, time_to_value, utc_to_value,
};

const DATABASES_QUERY: &str = r#"
    SELECT datname::text AS name
    FROM pg_database
    WHERE datistemplate = false
    ORDER BY datname
"#;

const TABLES_QUERY: &str = r#"
    SELECT
        c.relname::text AS name,
        COALESCE(am.amname::text, 'heap') AS engine,
        GREATEST(c.reltuples, 0)::bigint AS row_count,
        pg_total_relation_size(c.oid)::bigint AS data_size,
        ''::text AS create_time
    FROM pg_class c
    JOIN pg_namespace n ON n.oid = c.relnamespace
    LEFT JOIN pg_am am ON am.oid = c.relam
    WHERE n.nspname = 'public' AND c.relkind IN ('r', 'p')
    ORDER BY c.relname
"#;

const COLUMNS_QUERY: &str = r#"
    SELECT
        c.column_name::text AS name,
        c.data_type::text AS type,
        c.is_nullable::text AS nullable,
        CASE WHEN pk.column_name IS NOT NULL THEN 'PRI' ELSE '' END::text AS key,
        COALESCE(c.column_default::text, '') AS default_value,
        CASE WHEN c.is_identity = 'YES' THEN 'identity' ELSE '' END::text AS extra
    FROM information_schema.columns c
    LEFT JOIN (
        SELECT kcu.column_name
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
            ON kcu.constraint_name = tc.constraint_name
            AND kcu.table_schema = tc.table_schema
            AND kcu.table_name = tc.table_name
        WHERE tc.constraint_type = 'PRIMARY KEY'
            AND tc.table_schema = 'public'
            AND tc.table_name = $1
    ) pk ON pk.column_name = c.column_name
    WHERE c.table_schema = 'public' AND c.table_name = $1
    ORDER BY c.ordinal_position
"#;

const INDEXES_QUERY: &str = r#"
    SELECT
        i.relname::text AS index_name,
        a.attname::text AS column_name,
        ix.indisunique AS is_unique,
        ix.indisprimary AS is_primary
    FROM pg_index ix
    JOIN pg_class t ON t.oid = ix.indrelid
    JOIN pg_class i ON i.oid = ix.indexrelid
    JOIN pg_namespace n ON n.oid = t.relnamespace
    JOIN LATERAL unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord) ON true
    JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = k.attnum
    WHERE n.nspname = 'public' AND t.relname = $1
    ORDER BY i.relname, k.ord
"#;

/// Live PostgreSQL pool.
pub struct PgConnection {
    pool: PgPool,
}

impl PgConnection {
    pub fn new(pool: PgPool) -> Self {
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
impl Connection for PgConnection {
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
            last_insert_id: 0,
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
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[Value],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match Param::from(value) {
            Param::Null => query.bind(None::<String>),
            Param::Bool(b) => query.bind(b),
            Param::Int(i) => query.bind(i),
            // no unsigned 64-bit type on the wire
            Param::UInt(u) => query.bind(Decimal::from(u)),
            Param::Float(f) => query.bind(f),
            Param::Text(s) => query.bind(s),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Vec<Value> {
    (0..row.columns().len())
        .map(|index| decode_cell(row, index))
        .collect()
}

fn decode_cell(row: &PgRow, index: usize) -> Value {
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
        i16 => Value::from,
        i32 => Value::from,
        i64 => Value::from,
        f32 => |v: f32| float_to_value(f64::from(v)),
        f64 => float_to_value,
        bool => Value::Bool,
        Decimal => decimal_to_value,
        NaiveDateTime => datetime_to_value,
        DateTime<Utc> => utc_to_value,
        NaiveDate => date_to_value,
        NaiveTime => time_to_value,
        Uuid => |v: Uuid| Value::String(v.to_string()),
        Value => |v: Value| v,
        Vec<u8> => bytes_to_value,
        Vec<String> => Value::from,
        Vec<i32> => Value::from,
        Vec<i64> => Value::from,
    );

    tracing::debug!(
        "Unsupported PostgreSQL column type {} at {}",
        row.columns()[index].type_info(),
        index
    );
    Value::Null
}

/// PostgreSQL driver. Identifiers use double quotes and parameters `$n`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDriver;

impl PostgresDriver {
    fn placeholders(&self, count: usize) -> String {
        (1..=count)
            .map(|i| format!("${}", i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn connect_options(&self, config: &ConnectionConfig) -> PgConnectOptions {
        let port = if config.port == 0 {
            self.default_port()
        } else {
            config.port
        };

        let mut options = PgConnectOptions::new()
            .host(&config.host)
            .port(port)
            .username(&config.user)
            .password(&config.password);

        if !config.database.is_empty() {
            options = options.database(&config.database);
        }

        if config.use_ssl {
            options = options.ssl_mode(config.ssl().to_pg_ssl_mode());
            if !config.ssl_ca_cert.is_empty() {
                options = options.ssl_root_cert(&config.ssl_ca_cert);
            }
            if !config.ssl_client_cert.is_empty() {
                options = options.ssl_client_cert(&config.ssl_client_cert);
            }
            if !config.ssl_client_key.is_empty() {
                options = options.ssl_client_key(&config.ssl_client_key);
            }
        } else {
            options = options.ssl_mode(PgSslMode::Disable);
        }

        options
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
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
            PgPoolOptions::new()
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

        tracing::info!("Connected to PostgreSQL at {}", target);
        Ok(Arc::new(PgConnection::new(pool)))
    }

    async fn list_databases(&self, conn: &dyn Connection) -> Result<Vec<String>> {
        let result = conn.fetch(DATABASES_QUERY, &[]).await?;
        Ok(result.records().map(|r| r.text("name")).collect())
    }

    async fn list_tables(&self, conn: &dyn Connection, _database: &str) -> Result<Vec<TableInfo>> {
        let result = conn.fetch(TABLES_QUERY, &[]).await?;
        Ok(result
            .records()
            .map(|r| TableInfo {
                name: r.text("name"),
                engine: r.text("engine"),
                row_count: r.int("row_count"),
                data_size: r.int("data_size"),
                create_time: r.text("create_time"),
            })
            .collect())
    }

    async fn list_columns(
        &self,
        conn: &dyn Connection,
        _database: &str,
        table: &str,
    ) -> Result<Vec<ColumnInfo>> {
        let result = conn
            .fetch(COLUMNS_QUERY, &[Value::String(table.to_string())])
            .await?;
        Ok(result
            .records()
            .map(|r| ColumnInfo {
                name: r.text("name"),
                data_type: r.text("type"),
                nullable: r.text("nullable").eq_ignore_ascii_case("YES"),
                key: r.text("key"),
                default: r.text("default_value"),
                extra: r.text("extra"),
                old_name: None,
            })
            .collect())
    }

    async fn list_indexes(
        &self,
        conn: &dyn Connection,
        _database: &str,
        table: &str,
    ) -> Result<Vec<IndexInfo>> {
        let result = conn
            .fetch(INDEXES_QUERY, &[Value::String(table.to_string())])
            .await?;
        Ok(coalesce_index_rows(result.records().map(|r| {
            (
                r.text("index_name"),
                r.text("column_name"),
                r.flag("is_unique"),
                r.flag("is_primary"),
            )
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
            self.quote_identifier(&req.table),
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

    fn build_count_query(&self, _database: &str, table: &str, filters: &str) -> String {
        format!(
            "SELECT COUNT(*) FROM {}{}",
            self.quote_identifier(table),
            where_clause(filters)
        )
    }

    fn build_truncate(&self, _database: &str, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.quote_identifier(table))
    }

    fn build_drop(&self, _database: &str, table: &str) -> String {
        format!("DROP TABLE {}", self.quote_identifier(table))
    }

    fn build_insert(&self, _database: &str, table: &str, columns: &[String]) -> String {
        let quoted: Vec<_> = columns.iter().map(|c| self.quote_identifier(c)).collect();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_identifier(table),
            quoted.join(", "),
            self.placeholders(columns.len())
        )
    }

    fn build_update(
        &self,
        _database: &str,
        table: &str,
        primary_key: &str,
        columns: &[String],
    ) -> String {
        let sets: Vec<_> = columns
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{} = ${}", self.quote_identifier(c), i + 1))
            .collect();
        format!(
            "UPDATE {} SET {} WHERE {} = ${}",
            self.quote_identifier(table),
            sets.join(", "),
            self.quote_identifier(primary_key),
            columns.len() + 1
        )
    }

    fn build_delete(&self, _database: &str, table: &str, primary_key: &str) -> String {
        format!(
            "DELETE FROM {} WHERE {} = $1",
            self.quote_identifier(table),
            self.quote_identifier(primary_key)
        )
    }

    fn build_batch_delete(
        &self,
        _database: &str,
        table: &str,
        primary_key: &str,
        count: usize,
    ) -> String {
        format!(
            "DELETE FROM {} WHERE {} IN ({})",
            self.quote_identifier(table),
            self.quote_identifier(primary_key),
            self.placeholders(count)
        )
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::database::driver::testing::StaticConnection;
    use crate::services::database::types::TableAlteration;
    use serde_json::json;

    #[test]
    fn test_build_table_data_query() {
        let driver = PostgresDriver;
        let mut req = TableDataRequest {
            database: "app".into(),
            table: "users".into(),
            page: 3,
            page_size: 25,
            ..Default::default()
        };
        assert_eq!(
            driver.build_table_data_query(&req, "id"),
            "SELECT * FROM \"users\" ORDER BY \"id\" ASC LIMIT 25 OFFSET 50"
        );

        req.filters = "age > 30".into();
        req.order_by = "name".into();
        req.order_dir = "DESC".into();
        assert_eq!(
            driver.build_table_data_query(&req, "id"),
            "SELECT * FROM \"users\" WHERE age > 30 ORDER BY \"name\" DESC LIMIT 25 OFFSET 50"
        );
    }

    #[test]
    fn test_build_crud_queries() {
        let driver = PostgresDriver;
        let columns = vec!["name".to_string(), "email".to_string()];

        assert_eq!(
            driver.build_insert("app", "users", &columns),
            "INSERT INTO \"users\" (\"name\", \"email\") VALUES ($1, $2)"
        );
        assert_eq!(
            driver.build_update("app", "users", "id", &columns),
            "UPDATE \"users\" SET \"name\" = $1, \"email\" = $2 WHERE \"id\" = $3"
        );
        assert_eq!(
            driver.build_delete("app", "users", "id"),
            "DELETE FROM \"users\" WHERE \"id\" = $1"
        );
        assert_eq!(
            driver.build_batch_delete("app", "users", "id", 4),
            "DELETE FROM \"users\" WHERE \"id\" IN ($1, $2, $3, $4)"
        );
        assert_eq!(
            driver.build_count_query("app", "users", ""),
            "SELECT COUNT(*) FROM \"users\""
        );
        assert_eq!(driver.build_truncate("app", "users"), "TRUNCATE TABLE \"users\"");
        assert_eq!(driver.build_drop("app", "users"), "DROP TABLE \"users\"");
        assert_eq!(driver.quote_identifier("we\"ird"), "\"we\"ird\"");
    }

    #[test]
    fn test_alter_table_is_unsupported() {
        let err = PostgresDriver
            .build_alter_table("app", "users", &TableAlteration::default())
            .unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Unsupported {
                dialect: Dialect::Postgres,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_list_indexes_binds_table_and_coalesces() {
        let conn = StaticConnection::new(
            &["index_name", "column_name", "is_unique", "is_primary"],
            vec![
                vec![json!("orders_pkey"), json!("id"), json!(true), json!(true)],
                vec![json!("orders_user_created_idx"), json!("user_id"), json!(false), json!(false)],
                vec![json!("orders_user_created_idx"), json!("created_at"), json!(false), json!(false)],
            ],
        );

        let indexes = PostgresDriver
            .list_indexes(&conn, "app", "orders")
            .await
            .unwrap();
        assert_eq!(indexes.len(), 2);
        assert!(indexes[0].is_primary);
        assert_eq!(indexes[1].columns, vec!["user_id", "created_at"]);

        let statements = conn.statements();
        assert_eq!(statements[0].1, vec![json!("orders")]);
    }

    #[tokio::test]
    async fn test_list_columns_reports_primary_key() {
        let conn = StaticConnection::new(
            &["name", "type", "nullable", "key", "default_value", "extra"],
            vec![
                vec![json!("id"), json!("integer"), json!("NO"), json!("PRI"), json!("nextval('orders_id_seq'::regclass)"), json!("")],
                vec![json!("note"), json!("text"), json!("YES"), json!(""), json!(""), json!("")],
            ],
        );

        let columns = PostgresDriver
            .list_columns(&conn, "app", "orders")
            .await
            .unwrap();
        assert!(columns[0].is_primary_key());
        assert!(!columns[0].nullable);
        assert!(columns[1].nullable);
        assert!(!columns[1].is_primary_key());
    }
}
