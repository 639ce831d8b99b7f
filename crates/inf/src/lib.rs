//! Shared infrastructure for the workspace crates: the common error type and small helpers

pub use error::Error;
pub type Result<T = ()> = std::result::Result<T, Error>;

pub mod duration;
mod error;
