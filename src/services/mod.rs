pub mod database;
pub mod ssh;
pub mod storage;
pub mod updates;
