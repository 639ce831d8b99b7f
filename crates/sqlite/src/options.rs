use std::ffi::c_int;
use std::time::Duration;

/// Busy timeout applied to every new connection
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
    Create,
}

impl AccessMode {
    pub(crate) fn open_flags(self) -> c_int {
        match self {
            AccessMode::ReadOnly => libsqlite3_sys::SQLITE_OPEN_READONLY,
            AccessMode::ReadWrite => libsqlite3_sys::SQLITE_OPEN_READWRITE,
            AccessMode::Create => libsqlite3_sys::SQLITE_OPEN_READWRITE | libsqlite3_sys::SQLITE_OPEN_CREATE,
        }
    }
}

/// Settings used when opening a [`crate::Connection`]
///
/// ```ignore
/// let options = OpenOptions::builder()
///     .access_mode(AccessMode::ReadWrite)
///     .exclusive_wal(true)
///     .busy_timeout(Duration::from_secs(5))
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub access_mode: AccessMode,
    /// Switch to exclusive locking and write-ahead logging right after opening.
    /// Faster for a single writer, but no other process can use the file meanwhile.
    pub exclusive_wal: bool,
    pub busy_timeout: Duration,
}

impl OpenOptions {
    pub fn builder() -> OpenOptionsBuilder {
        OpenOptionsBuilder::default()
    }
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::Create,
            exclusive_wal: true,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

#[derive(Default)]
pub struct OpenOptionsBuilder {
    options: OpenOptions,
}

impl OpenOptionsBuilder {
    pub fn access_mode(mut self, mode: AccessMode) -> Self {
        self.options.access_mode = mode;
        self
    }

    pub fn exclusive_wal(mut self, enabled: bool) -> Self {
        self.options.exclusive_wal = enabled;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.options.busy_timeout = timeout;
        self
    }

    pub fn build(self) -> OpenOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let opts = OpenOptions::default();
        assert_eq!(opts.access_mode, AccessMode::Create);
        assert!(opts.exclusive_wal);
        assert_eq!(opts.busy_timeout, Duration::from_millis(60_000));
    }

    #[test]
    fn builder_overrides() {
        let opts = OpenOptions::builder()
            .access_mode(AccessMode::ReadOnly)
            .exclusive_wal(false)
            .busy_timeout(Duration::from_millis(250))
            .build();
        assert_eq!(opts.access_mode, AccessMode::ReadOnly);
        assert!(!opts.exclusive_wal);
        assert_eq!(opts.busy_timeout, Duration::from_millis(250));
        assert_eq!(opts.access_mode.open_flags(), libsqlite3_sys::SQLITE_OPEN_READONLY);
    }
}
