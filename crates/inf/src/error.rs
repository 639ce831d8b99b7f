use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: Database busy.")]
    DatabaseBusy,
    #[error("Database error: {0}")]
    EngineError(String),
    #[error("Database error: Unable to open/create database file ({0})")]
    OpenFailed(String),
    #[error("Database error: Engine version mismatch (built against {compiled}, runtime {runtime})")]
    VersionMismatch { compiled: i32, runtime: i32 },
    #[error("Database error: Operation on a released handle")]
    InvalidHandle,
    #[error("Database error: {0}")]
    InvalidState(String),
    #[error("Database error: Invalid column index {0}")]
    IndexOutOfRange(usize),
    #[error("Database error: Invalid field name requested: {0}")]
    FieldNotFound(String),
    #[error("Database error: Only the first statement can be compiled, trailing statements are not allowed")]
    MultipleStatements,
    #[error("Database error: Tried to close a database before destroying all statement objects")]
    StatementsStillOpen,
    #[error("Database error: Unable to apply format to SQL string")]
    FormattingFailed,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Runtime error: {0}")]
    Runtime(String),
    #[error("Invalid string: {0}")]
    InvalidString(#[from] std::ffi::NulError),
    #[error("Invalid UTF-8 text: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl Error {
    /// Busy errors are the only ones a caller is expected to retry
    pub fn is_busy(&self) -> bool {
        matches!(self, Error::DatabaseBusy)
    }
}
