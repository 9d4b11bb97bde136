//! Core database infrastructure
//!
//! - `connection`: rusqlite connection wrapper
//! - `schema`: ledger/lock table definitions and initialization

mod connection;
mod schema;

pub use connection::{quote_identifier, DatabaseConn, DEFAULT_BUSY_TIMEOUT, IN_MEMORY};
pub use schema::{
    validate_table_name, LedgerSchema, SchemaManager, DEFAULT_LEDGER_TABLE, LOCK_TABLE_SUFFIX,
    MAX_TABLE_NAME_LEN,
};
