use crate::status::{check_status, status_error};
use crate::{Error, Result, Row};
use std::ffi::{CStr, c_char, c_int, c_void};

/// A value that can be bound to a statement parameter
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum Value<'a> {
    Null,
    Int(i32),
    Int64(i64),
    Double(f64),
    Text(&'a str),
    Blob(&'a [u8]),
}

impl From<i32> for Value<'_> {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value<'_> {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value<'_> {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl<'a> From<&'a str> for Value<'a> {
    fn from(v: &'a str) -> Self {
        Value::Text(v)
    }
}

impl<'a> From<&'a String> for Value<'a> {
    fn from(v: &'a String) -> Self {
        Value::Text(v.as_str())
    }
}

impl<'a> From<&'a [u8]> for Value<'a> {
    fn from(v: &'a [u8]) -> Self {
        Value::Blob(v)
    }
}

impl<'a> From<&'a Vec<u8>> for Value<'a> {
    fn from(v: &'a Vec<u8>) -> Self {
        Value::Blob(v.as_slice())
    }
}

impl<'a, T: Into<Value<'a>>> From<Option<T>> for Value<'a> {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A compiled SQL statement
///
/// Parameters are bound in order (`?1`, `?2`, ...) by successive `bind` calls,
/// `execute` runs the statement and positions it on the first result row.
/// Binding the first parameter again discards the previous result set, so the
/// statement can be reused for the next set of values:
///
/// ```ignore
/// let mut stmt = conn.compile("INSERT INTO person(name, age) VALUES(?, ?)")?;
/// stmt.bind("Alice")?.bind(33)?.execute()?;
/// stmt.bind("Bob")?.bind_same()?.execute()?;
/// ```
///
/// The native handle is finalized on drop or by an explicit [`Statement::dispose`].
pub struct Statement {
    stmt: *mut libsqlite3_sys::sqlite3_stmt,
    bind_next: c_int,
    end_of_rows: bool,
    column_count: usize,
}

impl Statement {
    pub(crate) fn new(stmt: *mut libsqlite3_sys::sqlite3_stmt) -> Self {
        Self {
            stmt,
            bind_next: 1,
            end_of_rows: true,
            column_count: 0,
        }
    }

    /// Bind the next parameter
    pub fn bind<'v>(&mut self, value: impl Into<Value<'v>>) -> Result<&mut Self> {
        match value.into() {
            Value::Null => self.bind_null(),
            Value::Int(v) => self.bind_int(v),
            Value::Int64(v) => self.bind_int64(v),
            Value::Double(v) => self.bind_double(v),
            Value::Text(v) => self.bind_text(v),
            Value::Blob(v) => self.bind_blob(v),
        }
    }

    pub fn bind_int(&mut self, value: c_int) -> Result<&mut Self> {
        let stmt = self.on_bind()?;
        self.bind_with(|index| unsafe { libsqlite3_sys::sqlite3_bind_int(stmt, index, value) })
    }

    pub fn bind_int64(&mut self, value: i64) -> Result<&mut Self> {
        let stmt = self.on_bind()?;
        self.bind_with(|index| unsafe { libsqlite3_sys::sqlite3_bind_int64(stmt, index, value) })
    }

    pub fn bind_double(&mut self, value: f64) -> Result<&mut Self> {
        let stmt = self.on_bind()?;
        self.bind_with(|index| unsafe { libsqlite3_sys::sqlite3_bind_double(stmt, index, value) })
    }

    /// The engine keeps its own copy of the text
    pub fn bind_text(&mut self, value: &str) -> Result<&mut Self> {
        let stmt = self.on_bind()?;
        let len = byte_length(value.len())?;
        self.bind_with(|index| unsafe {
            libsqlite3_sys::sqlite3_bind_text(
                stmt,
                index,
                value.as_ptr().cast::<c_char>(),
                len,
                libsqlite3_sys::SQLITE_TRANSIENT(),
            )
        })
    }

    /// The engine keeps its own copy of the data
    pub fn bind_blob(&mut self, value: &[u8]) -> Result<&mut Self> {
        let stmt = self.on_bind()?;
        let len = byte_length(value.len())?;
        self.bind_with(|index| unsafe {
            libsqlite3_sys::sqlite3_bind_blob(
                stmt,
                index,
                value.as_ptr().cast::<c_void>(),
                len,
                libsqlite3_sys::SQLITE_TRANSIENT(),
            )
        })
    }

    pub fn bind_null(&mut self) -> Result<&mut Self> {
        let stmt = self.on_bind()?;
        self.bind_with(|index| unsafe { libsqlite3_sys::sqlite3_bind_null(stmt, index) })
    }

    /// Keep the value currently bound to the next parameter and move on to the one after it
    pub fn bind_same(&mut self) -> Result<&mut Self> {
        self.on_bind()?;
        self.bind_next += 1;
        Ok(self)
    }

    /// Run the statement, afterwards the first result row (if any) is the current row
    pub fn execute(&mut self) -> Result<&mut Self> {
        let stmt = self.handle()?;
        self.bind_next = 1;
        if !self.end_of_rows {
            // the previous result set was not fully consumed
            unsafe { libsqlite3_sys::sqlite3_reset(stmt) };
        }

        let rc = unsafe { libsqlite3_sys::sqlite3_step(stmt) };
        match rc {
            libsqlite3_sys::SQLITE_DONE => {
                self.end_of_rows = true;
                self.column_count = 0;
            }
            libsqlite3_sys::SQLITE_ROW => {
                self.end_of_rows = false;
                self.column_count = unsafe { libsqlite3_sys::sqlite3_column_count(stmt) } as usize;
            }
            _ => {
                self.end_of_rows = true;
                self.column_count = 0;
                return Err(status_error(rc, self.db()));
            }
        }

        Ok(self)
    }

    /// Advance to the next row, returns false once the rows are exhausted
    pub fn next_row(&mut self) -> Result<bool> {
        let stmt = self.handle()?;
        if self.end_of_rows {
            return Ok(false);
        }

        let rc = unsafe { libsqlite3_sys::sqlite3_step(stmt) };
        match rc {
            libsqlite3_sys::SQLITE_ROW => Ok(true),
            libsqlite3_sys::SQLITE_DONE => {
                self.end_of_rows = true;
                self.column_count = 0;
                Ok(false)
            }
            _ => {
                self.end_of_rows = true;
                self.column_count = 0;
                Err(status_error(rc, self.db()))
            }
        }
    }

    pub fn has_row(&self) -> bool {
        !self.end_of_rows
    }

    /// The current result row
    ///
    /// The row borrows the statement, it has to be dropped before the statement can be advanced or rebound.
    pub fn current_row(&self) -> Result<Row<'_>> {
        self.handle()?;
        if self.end_of_rows {
            return Err(Error::InvalidState("called current_row() after reaching end of rows".to_string()));
        }

        Ok(Row::new(self))
    }

    /// Apply `f` to the current row and every row after it
    pub fn map_rows<T>(&mut self, mut f: impl FnMut(Row<'_>) -> Result<T>) -> Result<Vec<T>> {
        let mut result = Vec::new();
        while self.has_row() {
            result.push(f(self.current_row()?)?);
            self.next_row()?;
        }

        Ok(result)
    }

    /// Rewind the statement, bound values are kept
    pub fn reset(&mut self) -> Result<()> {
        let stmt = self.handle()?;
        self.bind_next = 1;
        self.end_of_rows = true;
        self.column_count = 0;
        check_status(unsafe { libsqlite3_sys::sqlite3_reset(stmt) }, self.db())
    }

    /// Number of columns of the current result set, 0 when there is no current row
    pub fn column_count(&self) -> usize {
        self.column_count
    }

    pub fn bind_parameter_count(&self) -> Result<usize> {
        let stmt = self.handle()?;
        Ok(unsafe { libsqlite3_sys::sqlite3_bind_parameter_count(stmt) } as usize)
    }

    /// The SQL text the statement was compiled from
    pub fn sql(&self) -> Result<&str> {
        let stmt = self.handle()?;
        let sql = unsafe { libsqlite3_sys::sqlite3_sql(stmt) };
        if sql.is_null() {
            return Ok("");
        }

        Ok(unsafe { CStr::from_ptr(sql) }.to_str()?)
    }

    pub fn is_disposed(&self) -> bool {
        self.stmt.is_null()
    }

    /// Finalize the native statement now instead of on drop, calling it again is a no-op
    pub fn dispose(&mut self) {
        self.end_of_rows = true;
        self.column_count = 0;
        if !self.stmt.is_null() {
            unsafe { libsqlite3_sys::sqlite3_finalize(self.stmt) };
            self.stmt = std::ptr::null_mut();
        }
    }

    pub(crate) fn handle(&self) -> Result<*mut libsqlite3_sys::sqlite3_stmt> {
        if self.stmt.is_null() {
            Err(Error::InvalidHandle)
        } else {
            Ok(self.stmt)
        }
    }

    fn db(&self) -> *mut libsqlite3_sys::sqlite3 {
        unsafe { libsqlite3_sys::sqlite3_db_handle(self.stmt) }
    }

    /// Binding the first parameter starts a new binding sequence and drops the previous result
    fn on_bind(&mut self) -> Result<*mut libsqlite3_sys::sqlite3_stmt> {
        let stmt = self.handle()?;
        if self.bind_next == 1 {
            unsafe { libsqlite3_sys::sqlite3_reset(stmt) };
            self.end_of_rows = true;
            self.column_count = 0;
        }

        Ok(stmt)
    }

    fn bind_with(&mut self, bind: impl FnOnce(c_int) -> c_int) -> Result<&mut Self> {
        let rc = bind(self.bind_next);
        check_status(rc, self.db())?;
        self.bind_next += 1;
        Ok(self)
    }
}

impl Drop for Statement {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("sql", &self.sql().unwrap_or_default())
            .field("bind_next", &self.bind_next)
            .field("has_row", &self.has_row())
            .finish()
    }
}

fn byte_length(len: usize) -> Result<c_int> {
    c_int::try_from(len).map_err(|_| Error::InvalidArgument(format!("Value of {len} bytes is too large to bind")))
}
