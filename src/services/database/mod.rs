//! Database access: dialect drivers, the session manager and the CRUD and
//! schema operations layered on top of it.

mod crud;
mod driver;
mod error;
mod manager;
mod mysql;
mod postgres;
mod schema;
mod settings;
mod types;
mod values;

pub use driver::{Connection, Driver, DriverRegistry};
pub use error::{DatabaseError, Result};
pub use manager::DatabaseManager;
pub use mysql::{MySqlConnection, MySqlDriver};
pub use postgres::{PgConnection, PostgresDriver};
pub use settings::{ClientSettings, DEFAULT_PAGE_SIZE};
pub use types::{
    ColumnInfo, ConnectionConfig, DatabaseInfo, Dialect, ExecuteResult, IndexInfo, QueryResult,
    Record, RowData, SavedConnection, SslMode, TableAlteration, TableDataRequest,
    TableDataResponse, TableDetails, TableInfo,
};
