use serde_json::Value;

use super::driver::{page_window, total_pages};
use super::error::{DatabaseError, Result};
use super::manager::DatabaseManager;
use super::types::{ExecuteResult, RowData, TableDataRequest, TableDataResponse};

impl DatabaseManager {
    /// One page of table rows plus paging metadata.
    ///
    /// Rows are ordered by the caller's column or, failing that, the primary
    /// key. `filters` is inserted into the SQL as-is.
    pub async fn table_data(&self, req: &TableDataRequest) -> Result<TableDataResponse> {
        let (connection, driver) = self.active().await?;

        let columns = driver
            .list_columns(connection.as_ref(), &req.database, &req.table)
            .await?;
        let primary_key = columns
            .iter()
            .find(|c| c.is_primary_key())
            .map(|c| c.name.clone())
            .unwrap_or_default();

        let count_sql = driver.build_count_query(&req.database, &req.table, &req.filters);
        let counted = connection.fetch(&count_sql, &[]).await?;
        let total_rows = counted.records().next().map_or(0, |r| {
            counted.columns.first().map_or(0, |c| r.int(c))
        });

        let (page, page_size, _) = page_window(req);
        let sql = driver.build_table_data_query(req, &primary_key);
        let result = connection.fetch(&sql, &[]).await?;

        let total_pages = total_pages(total_rows, page_size);

        Ok(TableDataResponse {
            columns,
            rows: result.rows,
            total_rows,
            page,
            page_size,
            total_pages,
            primary_key,
        })
    }

    pub async fn insert_row(
        &self,
        database: &str,
        table: &str,
        data: &RowData,
    ) -> Result<ExecuteResult> {
        let (connection, driver) = self.active().await?;
        if data.is_empty() {
            return Err(DatabaseError::InvalidInput("no data provided".to_string()));
        }

        let (columns, values) = split_row(data);
        let sql = driver.build_insert(database, table, &columns);
        connection.execute(&sql, &values).await
    }

    /// Update the row whose `primary_key` equals `key_value`.
    pub async fn update_row(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        key_value: &Value,
        data: &RowData,
    ) -> Result<ExecuteResult> {
        let (connection, driver) = self.active().await?;
        if data.is_empty() {
            return Err(DatabaseError::InvalidInput("no data provided".to_string()));
        }

        let (columns, mut values) = split_row(data);
        values.push(key_value.clone());
        let sql = driver.build_update(database, table, primary_key, &columns);
        let result = connection.execute(&sql, &values).await?;
        Ok(ExecuteResult {
            rows_affected: result.rows_affected,
            last_insert_id: 0,
        })
    }

    pub async fn delete_row(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        key_value: &Value,
    ) -> Result<ExecuteResult> {
        let (connection, driver) = self.active().await?;
        let sql = driver.build_delete(database, table, primary_key);
        let result = connection
            .execute(&sql, std::slice::from_ref(key_value))
            .await?;
        Ok(ExecuteResult {
            rows_affected: result.rows_affected,
            last_insert_id: 0,
        })
    }

    /// Delete every row whose primary key is in `key_values`. An empty list
    /// runs nothing.
    pub async fn delete_rows(
        &self,
        database: &str,
        table: &str,
        primary_key: &str,
        key_values: &[Value],
    ) -> Result<ExecuteResult> {
        let (connection, driver) = self.active().await?;
        if key_values.is_empty() {
            return Ok(ExecuteResult::default());
        }

        let sql = driver.build_batch_delete(database, table, primary_key, key_values.len());
        let result = connection.execute(&sql, key_values).await?;
        Ok(ExecuteResult {
            rows_affected: result.rows_affected,
            last_insert_id: 0,
        })
    }
}

fn split_row(data: &RowData) -> (Vec<String>, Vec<Value>) {
    data.iter().map(|(k, v)| (k.clone(), v.clone())).unzip()
}
