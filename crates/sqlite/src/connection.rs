use crate::format::{self, FormatArg};
use crate::options::{AccessMode, OpenOptions};
use crate::status::{check_status, describe_status, engine_message, status_error};
use crate::{Error, Result, Statement};
use std::ffi::{CStr, CString, c_char, c_int, c_uint, c_void};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

type TraceHandler = Box<dyn Fn(&str)>;

// exported by the bundled engine, the generated bindings only carry sqlite3_close
unsafe extern "C" {
    fn sqlite3_close_v2(db: *mut libsqlite3_sys::sqlite3) -> c_int;
}

/// An open database
///
/// Every [`Statement`] compiled on the connection has to be disposed before [`Connection::close`] succeeds.
/// Dropping the connection closes it, if statements are still alive the engine releases the
/// handle once the last one is finalized.
pub struct Connection {
    db: *mut libsqlite3_sys::sqlite3,
    busy_timeout: Duration,
    interrupt_lock: Arc<Mutex<*mut libsqlite3_sys::sqlite3>>,
    trace_handler: Option<Box<TraceHandler>>,
}

/// Allows interrupting a running query of a [`Connection`] from another thread
#[derive(Clone)]
pub struct InterruptHandle {
    db_lock: Arc<Mutex<*mut libsqlite3_sys::sqlite3>>,
}

// sqlite3_interrupt is safe to call from any thread, the lock guarantees the handle is still open
unsafe impl Send for InterruptHandle {}
unsafe impl Sync for InterruptHandle {}

impl InterruptHandle {
    /// Ask the running statement to abort, it fails with `SQLITE_INTERRUPT`. No-op once the connection is closed.
    pub fn interrupt(&self) {
        let db = self.db_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !db.is_null() {
            unsafe { libsqlite3_sys::sqlite3_interrupt(*db) };
        }
    }
}

/// Runtime version of the engine
pub fn sqlite_version() -> &'static str {
    let version = unsafe { libsqlite3_sys::sqlite3_libversion() };
    if version.is_null() {
        return "";
    }

    unsafe { CStr::from_ptr(version) }.to_str().unwrap_or_default()
}

fn check_engine_version() -> Result<()> {
    let runtime = unsafe { libsqlite3_sys::sqlite3_libversion_number() };
    if runtime != libsqlite3_sys::SQLITE_VERSION_NUMBER {
        return Err(Error::VersionMismatch {
            compiled: libsqlite3_sys::SQLITE_VERSION_NUMBER,
            runtime,
        });
    }

    Ok(())
}

impl Connection {
    /// Open the database, creating the file if it does not exist
    ///
    /// With `exclusive_wal` the connection switches to exclusive locking and write-ahead logging,
    /// which is a lot faster for a single writer but locks out every other process.
    pub fn open(db_path: impl AsRef<Path>, exclusive_wal: bool) -> Result<Self> {
        let options = OpenOptions::builder()
            .access_mode(AccessMode::Create)
            .exclusive_wal(exclusive_wal)
            .build();
        Self::open_with_options(db_path, &options)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::open(":memory:", false)
    }

    pub fn open_with_options(db_path: impl AsRef<Path>, options: &OpenOptions) -> Result<Self> {
        check_engine_version()?;

        let db_path = db_path.as_ref();
        let mut db: *mut libsqlite3_sys::sqlite3 = std::ptr::null_mut();
        let c_path = CString::new(db_path.to_string_lossy().to_string())?;
        let rc = unsafe {
            libsqlite3_sys::sqlite3_open_v2(
                c_path.as_ptr(),
                &mut db,
                options.access_mode.open_flags(),
                std::ptr::null(),
            )
        };
        if rc != libsqlite3_sys::SQLITE_OK {
            let error_message = engine_message(db);
            unsafe { libsqlite3_sys::sqlite3_close(db) };
            return Err(Error::OpenFailed(error_message));
        }

        let mut conn = Self {
            db,
            busy_timeout: options.busy_timeout,
            interrupt_lock: Arc::new(Mutex::new(db)),
            trace_handler: None,
        };
        conn.set_busy_timeout(options.busy_timeout)?;
        log::debug!("Opened database {} ({:?})", db_path.display(), options.access_mode);

        if options.exclusive_wal {
            conn.execute("PRAGMA locking_mode = EXCLUSIVE; PRAGMA journal_mode = WAL;")?;
            log::debug!("Exclusive locking with write-ahead logging enabled");
        }

        Ok(conn)
    }

    pub fn is_open(&self) -> bool {
        !self.db.is_null()
    }

    /// Close the database
    ///
    /// Fails with [`Error::StatementsStillOpen`] while any statement of this connection has not been disposed.
    /// Closing an already closed connection is a no-op.
    pub fn close(&mut self) -> Result<()> {
        if self.db.is_null() {
            return Ok(());
        }

        if !unsafe { libsqlite3_sys::sqlite3_next_stmt(self.db, std::ptr::null_mut()) }.is_null() {
            return Err(Error::StatementsStillOpen);
        }

        let mut interrupt_db = self.interrupt_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let rc = unsafe { libsqlite3_sys::sqlite3_close(self.db) };
        if rc != libsqlite3_sys::SQLITE_OK {
            return Err(status_error(rc, self.db));
        }

        *interrupt_db = std::ptr::null_mut();
        self.db = std::ptr::null_mut();
        self.trace_handler = None;
        Ok(())
    }

    /// Compile a single statement, trailing statements are refused
    pub fn compile(&self, sql: &str) -> Result<Statement> {
        let db = self.handle()?;
        let len = c_int::try_from(sql.len())
            .map_err(|_| Error::InvalidArgument(format!("SQL text of {} bytes is too large", sql.len())))?;

        let mut stmt: *mut libsqlite3_sys::sqlite3_stmt = std::ptr::null_mut();
        let mut tail: *const c_char = std::ptr::null();
        let rc = unsafe {
            libsqlite3_sys::sqlite3_prepare_v2(db, sql.as_ptr().cast::<c_char>(), len, &mut stmt, &mut tail)
        };
        if rc != libsqlite3_sys::SQLITE_OK {
            return Err(status_error(rc, db));
        }

        let statement = Statement::new(stmt);
        let consumed = if tail.is_null() {
            sql.len()
        } else {
            (tail as usize).saturating_sub(sql.as_ptr() as usize)
        };
        if !is_blank_sql(sql.get(consumed..).unwrap_or_default()) {
            return Err(Error::MultipleStatements);
        }

        if statement.is_disposed() {
            return Err(Error::InvalidArgument(format!("No SQL statement found in '{sql}'")));
        }

        Ok(statement)
    }

    /// Run SQL text that may contain multiple statements, result rows are discarded
    pub fn execute(&self, sql: &str) -> Result<()> {
        let db = self.handle()?;
        let c_sql = CString::new(sql)?;
        let rc = unsafe {
            libsqlite3_sys::sqlite3_exec(db, c_sql.as_ptr(), None, std::ptr::null_mut(), std::ptr::null_mut())
        };
        check_status(rc, db)
    }

    /// Format the SQL text (see [`crate::format`]) and execute it
    pub fn exec(&self, sql: &str, args: &[FormatArg]) -> Result<()> {
        self.handle()?;
        let formatted = format::format_sql(sql, args)?;
        self.execute(&formatted)
    }

    /// Format the SQL text, compile it and execute it once
    ///
    /// The returned statement is positioned on the first result row, this is the main entry point for reading:
    /// ```ignore
    /// let stmt = conn.query("SELECT name FROM person WHERE id = %d", sql_args![1])?;
    /// if stmt.has_row() {
    ///     println!("{}", stmt.current_row()?.string_field("name", "")?);
    /// }
    /// ```
    pub fn query(&self, sql: &str, args: &[FormatArg]) -> Result<Statement> {
        self.handle()?;
        let formatted = format::format_sql(sql, args)?;
        let mut stmt = self.compile(&formatted)?;
        stmt.execute()?;
        Ok(stmt)
    }

    pub fn format(&self, sql: &str, args: &[FormatArg]) -> Result<String> {
        format::format_sql(sql, args)
    }

    pub fn format_value(&self, conversion: char, value: Option<&str>) -> Result<String> {
        format::format_value(conversion, value)
    }

    /// Row id of the most recent successful INSERT
    pub fn last_row_id(&self) -> Result<i64> {
        let db = self.handle()?;
        Ok(unsafe { libsqlite3_sys::sqlite3_last_insert_rowid(db) })
    }

    /// Rows changed by the most recently completed INSERT, UPDATE or DELETE
    pub fn number_of_rows_changed(&self) -> Result<i32> {
        let db = self.handle()?;
        Ok(unsafe { libsqlite3_sys::sqlite3_changes(db) })
    }

    pub fn table_exists(&self, table: &str) -> Result<bool> {
        let sql = format::format_sql(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=%Q",
            &[FormatArg::Text(Some(table))],
        )?;
        // the escaped name may contain '%', keep it away from a second formatting pass
        Ok(self.scalar_of(&sql, -1)? > 0)
    }

    /// First column of the first row as integer, `error_value` if the query produced no data
    pub fn get_scalar(&self, sql: &str, error_value: i32) -> Result<i32> {
        let formatted = format::format_sql(sql, &[])?;
        self.scalar_of(&formatted, error_value)
    }

    fn scalar_of(&self, sql: &str, error_value: i32) -> Result<i32> {
        let mut stmt = self.compile(sql)?;
        stmt.execute()?;
        if !stmt.has_row() {
            return Ok(error_value);
        }

        let row = stmt.current_row()?;
        if row.num_fields() < 1 {
            return Ok(error_value);
        }

        row.int_field(0, 0)
    }

    /// Abort any pending operation on this connection
    pub fn interrupt(&self) {
        if !self.db.is_null() {
            unsafe { libsqlite3_sys::sqlite3_interrupt(self.db) };
        }
    }

    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            db_lock: Arc::clone(&self.interrupt_lock),
        }
    }

    /// How long a locked table is retried before the operation fails with [`Error::DatabaseBusy`]
    pub fn set_busy_timeout(&mut self, timeout: Duration) -> Result<()> {
        let db = self.handle()?;
        self.busy_timeout = timeout;
        check_status(
            unsafe { libsqlite3_sys::sqlite3_busy_timeout(db, inf::duration::clamped_millis(timeout)) },
            db,
        )?;
        log::debug!("Busy timeout set to {} ms", timeout.as_millis());
        Ok(())
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Invoke `handler` with the expanded SQL text of every statement right before it runs
    pub fn set_trace_handler(&mut self, handler: impl Fn(&str) + 'static) -> Result<()> {
        let db = self.handle()?;
        let mut handler: Box<TraceHandler> = Box::new(Box::new(handler));
        let ctx = (&mut *handler as *mut TraceHandler).cast::<c_void>();
        check_status(
            unsafe {
                libsqlite3_sys::sqlite3_trace_v2(db, libsqlite3_sys::SQLITE_TRACE_STMT as c_uint, Some(trace_callback), ctx)
            },
            db,
        )?;

        // registered before the previous handler is released
        self.trace_handler = Some(handler);
        Ok(())
    }

    pub fn clear_trace_handler(&mut self) -> Result<()> {
        let db = self.handle()?;
        self.unregister_trace(db);
        Ok(())
    }

    /// Log every executed statement at debug level
    pub fn enable_trace_logging(&mut self) -> Result<()> {
        self.set_trace_handler(|sql| log::debug!("SQL: {sql}"))
    }

    /// Execute a file containing SQL statements
    pub fn execute_sql_file(&self, sql_path: &Path) -> Result<()> {
        let sql_contents = std::fs::read_to_string(sql_path)
            .map_err(|e| Error::Runtime(format!("Failed to open sql file '{}': {e}", sql_path.display())))?;
        self.execute(&sql_contents)
    }

    pub fn path(&self) -> Option<String> {
        if self.db.is_null() {
            return None;
        }

        let filename = unsafe { libsqlite3_sys::sqlite3_db_filename(self.db, c"main".as_ptr()) };
        if !filename.is_null() {
            let c_str = unsafe { CStr::from_ptr(filename.cast::<c_char>()) };
            let path = c_str.to_string_lossy().to_string();
            // in-memory and temporary databases report an empty file name
            return (!path.is_empty()).then_some(path);
        }
        None
    }

    pub fn last_error(&self) -> String {
        engine_message(self.db)
    }

    fn handle(&self) -> Result<*mut libsqlite3_sys::sqlite3> {
        if self.db.is_null() {
            Err(Error::InvalidHandle)
        } else {
            Ok(self.db)
        }
    }

    fn unregister_trace(&mut self, db: *mut libsqlite3_sys::sqlite3) {
        unsafe { libsqlite3_sys::sqlite3_trace_v2(db, 0, None, std::ptr::null_mut()) };
        self.trace_handler = None;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Failed to close database: {e}");
            if self.db.is_null() {
                return;
            }

            // the engine closes the handle once the remaining statements are finalized
            let db = self.db;
            self.unregister_trace(db);
            *self.interrupt_lock.lock().unwrap_or_else(PoisonError::into_inner) = std::ptr::null_mut();
            let rc = unsafe { sqlite3_close_v2(db) };
            if rc != libsqlite3_sys::SQLITE_OK {
                log::warn!("Deferred close of database failed: {}", describe_status(rc));
            }
            self.db = std::ptr::null_mut();
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("path", &self.path())
            .field("open", &self.is_open())
            .field("busy_timeout", &self.busy_timeout)
            .finish()
    }
}

/// True when `sql` only holds whitespace and comments
fn is_blank_sql(mut sql: &str) -> bool {
    loop {
        sql = sql.trim_start();
        if let Some(rest) = sql.strip_prefix("--") {
            sql = rest.split_once('\n').map_or("", |(_, next)| next);
        } else if let Some(rest) = sql.strip_prefix("/*") {
            sql = rest.split_once("*/").map_or("", |(_, next)| next);
        } else {
            return sql.is_empty();
        }
    }
}

unsafe extern "C" fn trace_callback(event: c_uint, ctx: *mut c_void, stmt: *mut c_void, sql: *mut c_void) -> c_int {
    if event != libsqlite3_sys::SQLITE_TRACE_STMT as c_uint || ctx.is_null() {
        return 0;
    }

    let expanded = unsafe { libsqlite3_sys::sqlite3_expanded_sql(stmt.cast()) };
    let text = if !expanded.is_null() {
        unsafe { CStr::from_ptr(expanded) }.to_string_lossy().into_owned()
    } else if !sql.is_null() {
        unsafe { CStr::from_ptr(sql.cast::<c_char>()) }.to_string_lossy().into_owned()
    } else {
        String::new()
    };
    if !expanded.is_null() {
        unsafe { libsqlite3_sys::sqlite3_free(expanded.cast()) };
    }

    let handler = unsafe { &*(ctx as *const TraceHandler) };
    // a panic must not unwind into the engine
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler(&text)));
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql_args;
    use crate::testutils::{memory_db, people_db};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test_log::test]
    fn compile_then_dispose_allows_close() -> Result<()> {
        let mut conn = memory_db()?;
        let mut stmt = conn.compile("SELECT 1")?;
        stmt.dispose();
        conn.close()?;
        assert!(!conn.is_open());
        conn.close()?;
        Ok(())
    }

    #[test_log::test]
    fn close_refused_with_open_statement() -> Result<()> {
        let mut conn = memory_db()?;
        let stmt = conn.compile("SELECT 1")?;
        assert!(matches!(conn.close(), Err(Error::StatementsStillOpen)));
        assert!(conn.is_open());

        drop(stmt);
        conn.close()?;
        Ok(())
    }

    #[test_log::test]
    fn closed_connection_rejects_use() -> Result<()> {
        let mut conn = memory_db()?;
        conn.close()?;
        assert!(matches!(conn.compile("SELECT 1"), Err(Error::InvalidHandle)));
        assert!(matches!(conn.execute("SELECT 1"), Err(Error::InvalidHandle)));
        assert!(matches!(conn.query("SELECT 1", sql_args![]), Err(Error::InvalidHandle)));
        assert!(matches!(conn.last_row_id(), Err(Error::InvalidHandle)));
        conn.interrupt();
        Ok(())
    }

    #[test_log::test]
    fn drop_with_live_statement_defers_close() -> Result<()> {
        let tmp = tempfile::TempDir::new()?;
        let db_path = tmp.path().join("deferred.db");

        // exclusive locking keeps the file locked for as long as the handle lives
        let conn = Connection::open(&db_path, true)?;
        conn.execute("CREATE TABLE t(x); INSERT INTO t VALUES(1), (2);")?;
        let mut stmt = conn.compile("SELECT x FROM t ORDER BY x")?;
        drop(conn);

        stmt.execute()?;
        let values = stmt.map_rows(|row| row.int_field(0, -1))?;
        assert_eq!(values, vec![1, 2]);

        let options = OpenOptions::builder()
            .access_mode(AccessMode::ReadWrite)
            .exclusive_wal(false)
            .busy_timeout(Duration::from_millis(20))
            .build();
        {
            let other = Connection::open_with_options(&db_path, &options)?;
            let busy = other.get_scalar("SELECT COUNT(*) FROM t", -1).unwrap_err();
            assert!(busy.is_busy(), "unexpected error: {busy}");
        }

        stmt.dispose();
        let reopened = Connection::open_with_options(&db_path, &options)?;
        assert_eq!(reopened.get_scalar("SELECT COUNT(*) FROM t", -1)?, 2);
        Ok(())
    }

    #[test_log::test]
    fn compile_refuses_multiple_statements() -> Result<()> {
        let conn = memory_db()?;
        assert!(matches!(conn.compile("SELECT 1; SELECT 2"), Err(Error::MultipleStatements)));
        assert!(matches!(conn.query("SELECT 1; SELECT 2", sql_args![]), Err(Error::MultipleStatements)));
        conn.compile("SELECT 1;  \n")?;
        conn.compile("SELECT 1; -- done")?;
        conn.compile("SELECT 1; /* a */ -- b\n  ")?;
        assert!(matches!(conn.compile("SELECT 1; -- done\nSELECT 2"), Err(Error::MultipleStatements)));
        assert!(matches!(conn.compile("   "), Err(Error::InvalidArgument(_))));
        Ok(())
    }

    #[test_log::test]
    fn compile_reports_engine_message() -> Result<()> {
        let conn = memory_db()?;
        match conn.compile("SELECT * FROM missing") {
            Err(Error::EngineError(msg)) => assert_eq!(msg, "no such table: missing"),
            other => panic!("Unexpected result: {other:?}"),
        }
        Ok(())
    }

    #[test_log::test]
    fn execute_runs_batches() -> Result<()> {
        let conn = memory_db()?;
        conn.execute("CREATE TABLE a(x); CREATE TABLE b(y); INSERT INTO a VALUES(1);")?;
        assert!(conn.table_exists("a")?);
        assert!(conn.table_exists("b")?);
        assert!(!conn.table_exists("c")?);
        assert!(matches!(conn.execute("INSERT INTO c VALUES(1)"), Err(Error::EngineError(_))));
        Ok(())
    }

    #[test_log::test]
    fn table_exists_escapes_name() -> Result<()> {
        let conn = memory_db()?;
        conn.execute("CREATE TABLE \"it's 100%\"(x)")?;
        assert!(conn.table_exists("it's 100%")?);
        assert!(!conn.table_exists("x' OR '1'='1")?);
        Ok(())
    }

    #[test_log::test]
    fn exec_with_quoted_text() -> Result<()> {
        let conn = people_db()?;
        conn.exec("INSERT INTO person(name, age) VALUES(%Q, %d)", sql_args!["O'Brien", 51])?;
        assert_eq!(conn.number_of_rows_changed()?, 1);

        let stmt = conn.query("SELECT age FROM person WHERE name = '%q'", sql_args!["O'Brien"])?;
        assert_eq!(stmt.current_row()?.int_field("age", 0)?, 51);
        Ok(())
    }

    #[test_log::test]
    fn scalar_values() -> Result<()> {
        let conn = people_db()?;
        assert_eq!(conn.get_scalar("SELECT COUNT(*) FROM person", -1)?, 3);
        assert_eq!(conn.get_scalar("SELECT COUNT(*) FROM person WHERE id = 999", -1)?, 0);
        assert_eq!(conn.get_scalar("SELECT id FROM person WHERE id = 999", -1)?, -1);
        assert_eq!(conn.get_scalar("SELECT NULL", -1)?, 0);
        Ok(())
    }

    #[test_log::test]
    fn format_helpers() -> Result<()> {
        let conn = memory_db()?;
        assert_eq!(conn.format("name = %Q", sql_args!["it's"])?, "name = 'it''s'");
        assert_eq!(conn.format_value('q', Some("it's"))?, "it''s");
        Ok(())
    }

    #[test_log::test]
    fn busy_timeout_is_tracked() -> Result<()> {
        let mut conn = memory_db()?;
        assert_eq!(conn.busy_timeout(), Duration::from_secs(60));
        conn.set_busy_timeout(Duration::from_millis(10))?;
        assert_eq!(conn.busy_timeout(), Duration::from_millis(10));
        Ok(())
    }

    #[test_log::test]
    fn trace_handler_sees_expanded_sql() -> Result<()> {
        let mut conn = memory_db()?;
        conn.execute("CREATE TABLE t(x)")?;

        let traced = Rc::new(RefCell::new(Vec::<String>::new()));
        let sink = Rc::clone(&traced);
        conn.set_trace_handler(move |sql| sink.borrow_mut().push(sql.to_string()))?;

        let mut stmt = conn.compile("INSERT INTO t VALUES(?)")?;
        stmt.bind("it's")?.execute()?;
        drop(stmt);
        assert!(traced.borrow().iter().any(|sql| sql == "INSERT INTO t VALUES('it''s')"));

        conn.clear_trace_handler()?;
        let traced_count = traced.borrow().len();
        conn.execute("DELETE FROM t")?;
        assert_eq!(traced.borrow().len(), traced_count);
        Ok(())
    }

    #[test_log::test]
    fn interrupt_without_running_statement_is_harmless() -> Result<()> {
        let conn = people_db()?;
        conn.interrupt();
        conn.interrupt_handle().interrupt();
        assert_eq!(conn.get_scalar("SELECT COUNT(*) FROM person", -1)?, 3);
        Ok(())
    }

    #[test_log::test]
    fn interrupt_from_other_thread() -> Result<()> {
        let conn = memory_db()?;
        let handle = conn.interrupt_handle();
        let mut stmt = conn.query(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT x FROM c",
            sql_args![],
        )?;

        let interrupter = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            handle.interrupt();
        });

        let result = loop {
            match stmt.next_row() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        interrupter.join().expect("interrupt thread panicked");

        match result {
            Err(Error::EngineError(msg)) => assert_eq!(msg, "Result code 9 (SQLITE_INTERRUPT)"),
            other => panic!("Unexpected result: {other:?}"),
        }
        assert!(!stmt.has_row());
        Ok(())
    }

    #[test_log::test]
    fn in_memory_has_no_path() -> Result<()> {
        let conn = memory_db()?;
        assert_eq!(conn.path(), None);
        assert!(!sqlite_version().is_empty());
        Ok(())
    }
}
