//! Lightweight wrapper on top of the sqlite3-sys crate
//!
//! [`Connection`] owns an open database, [`Statement`] a compiled statement and [`Row`] is a view
//! on the current result row of a statement. SQL text can be built with the engine's quoting aware
//! formatting (`%q`, `%Q`), see [`format`].

mod connection;
pub mod format;
mod options;
mod row;
mod statement;
pub mod status;
#[cfg(test)]
mod testutils;

pub use connection::{Connection, InterruptHandle, sqlite_version};
pub use format::FormatArg;
pub use options::{AccessMode, DEFAULT_BUSY_TIMEOUT, OpenOptions, OpenOptionsBuilder};
pub use row::{ColumnType, FieldIndex, FromField, Row};
pub use statement::{Statement, Value};

pub type Error = inf::Error;
pub type Result<T = ()> = inf::Result<T>;
