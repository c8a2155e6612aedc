//! Connection management and schema browsing for MySQL and PostgreSQL,
//! with optional SSH tunneling and saved connection profiles.

pub mod services;

pub use services::{database, ssh, storage, updates};
