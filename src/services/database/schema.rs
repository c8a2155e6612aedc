use super::error::{DatabaseError, Result};
use super::manager::DatabaseManager;
use super::types::{ColumnInfo, DatabaseInfo, IndexInfo, TableAlteration, TableDetails, TableInfo};

impl DatabaseManager {
    pub async fn list_databases(&self) -> Result<Vec<DatabaseInfo>> {
        let (connection, driver) = self.active().await?;
        let names = driver.list_databases(connection.as_ref()).await?;
        Ok(names.into_iter().map(|name| DatabaseInfo { name }).collect())
    }

    pub async fn list_tables(&self, database: &str) -> Result<Vec<TableInfo>> {
        let (connection, driver) = self.active().await?;
        driver.list_tables(connection.as_ref(), database).await
    }

    pub async fn list_columns(&self, database: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let (connection, driver) = self.active().await?;
        driver
            .list_columns(connection.as_ref(), database, table)
            .await
    }

    pub async fn list_indexes(&self, database: &str, table: &str) -> Result<Vec<IndexInfo>> {
        let (connection, driver) = self.active().await?;
        driver
            .list_indexes(connection.as_ref(), database, table)
            .await
    }

    /// Columns and indexes of one table.
    pub async fn table_details(&self, database: &str, table: &str) -> Result<TableDetails> {
        let (connection, driver) = self.active().await?;
        let columns = driver
            .list_columns(connection.as_ref(), database, table)
            .await?;
        let indexes = driver
            .list_indexes(connection.as_ref(), database, table)
            .await?;

        Ok(TableDetails {
            name: table.to_string(),
            columns,
            indexes,
        })
    }

    /// Apply schema changes one statement at a time, stopping at the first
    /// failure. Statements that already ran are not rolled back.
    pub async fn alter_table(
        &self,
        database: &str,
        table: &str,
        alteration: &TableAlteration,
    ) -> Result<()> {
        let (connection, driver) = self.active().await?;
        let statements = driver.build_alter_table(database, table, alteration)?;

        for statement in statements {
            tracing::debug!("Executing: {}", statement);
            if let Err(e) = connection.execute(&statement, &[]).await {
                return Err(DatabaseError::Statement {
                    statement,
                    source: Box::new(e),
                });
            }
        }
        Ok(())
    }

    pub async fn truncate_table(&self, database: &str, table: &str) -> Result<()> {
        let (connection, driver) = self.active().await?;
        let sql = driver.build_truncate(database, table);
        connection.execute(&sql, &[]).await?;
        Ok(())
    }

    pub async fn drop_table(&self, database: &str, table: &str) -> Result<()> {
        let (connection, driver) = self.active().await?;
        let sql = driver.build_drop(database, table);
        connection.execute(&sql, &[]).await?;
        Ok(())
    }
}
