use crate::{Error, Result, Statement};
use std::{
    ffi::{CStr, c_char, c_int},
    slice,
};

/// Storage class of a value in the current row
///
/// The engine is dynamically typed per cell, so this can differ from the declared column type.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Float,
    Blob,
    Null,
    Text,
}

/// Addresses a column either by position or by name
pub trait FieldIndex {
    fn field_index(&self, row: &Row<'_>) -> Result<usize>;
}

impl FieldIndex for usize {
    fn field_index(&self, row: &Row<'_>) -> Result<usize> {
        row.check_index(*self)?;
        Ok(*self)
    }
}

impl FieldIndex for &str {
    fn field_index(&self, row: &Row<'_>) -> Result<usize> {
        row.field_index(self)
    }
}

impl FieldIndex for &String {
    fn field_index(&self, row: &Row<'_>) -> Result<usize> {
        row.field_index(self)
    }
}

/// Conversion of a cell into a Rust value, NULL becomes 0, 0.0, an empty string or an empty blob
pub trait FromField<'a>: Sized {
    fn from_field(row: &Row<'a>, index: usize) -> Result<Self>;
}

impl FromField<'_> for i32 {
    fn from_field(row: &Row<'_>, index: usize) -> Result<Self> {
        row.int_field(index, 0)
    }
}

impl FromField<'_> for i64 {
    fn from_field(row: &Row<'_>, index: usize) -> Result<Self> {
        row.int64_field(index, 0)
    }
}

impl FromField<'_> for f64 {
    fn from_field(row: &Row<'_>, index: usize) -> Result<Self> {
        row.float_field(index, 0.0)
    }
}

impl<'a> FromField<'a> for &'a str {
    fn from_field(row: &Row<'a>, index: usize) -> Result<Self> {
        row.string_field(index, "")
    }
}

impl FromField<'_> for String {
    fn from_field(row: &Row<'_>, index: usize) -> Result<Self> {
        Ok(row.string_field(index, "")?.to_string())
    }
}

impl<'a> FromField<'a> for &'a [u8] {
    fn from_field(row: &Row<'a>, index: usize) -> Result<Self> {
        row.blob_field(index)
    }
}

impl FromField<'_> for Vec<u8> {
    fn from_field(row: &Row<'_>, index: usize) -> Result<Self> {
        Ok(row.blob_field(index)?.to_vec())
    }
}

impl<'a, T: FromField<'a>> FromField<'a> for Option<T> {
    fn from_field(row: &Row<'a>, index: usize) -> Result<Self> {
        if row.field_is_null(index)? {
            Ok(None)
        } else {
            T::from_field(row, index).map(Some)
        }
    }
}

/// View on the current row of a statement
///
/// A row holds no data of its own, it reads straight from the statement.
/// Values borrowed from it (text, blobs) stay valid until the statement is advanced,
/// rebound or disposed, which the borrow on the statement enforces.
#[derive(Clone, Copy)]
pub struct Row<'a> {
    statement: &'a Statement,
    stmt: *mut libsqlite3_sys::sqlite3_stmt,
}

impl<'a> Row<'a> {
    pub(crate) fn new(statement: &'a Statement) -> Self {
        Self {
            stmt: statement.handle().unwrap_or(std::ptr::null_mut()),
            statement,
        }
    }

    pub fn num_fields(&self) -> usize {
        self.statement.column_count()
    }

    /// Index of the first column with exactly this name (case sensitive)
    pub fn field_index(&self, name: &str) -> Result<usize> {
        for index in 0..self.num_fields() {
            let column_name = unsafe { libsqlite3_sys::sqlite3_column_name(self.stmt, index as c_int) };
            if !column_name.is_null() && unsafe { CStr::from_ptr(column_name) }.to_bytes() == name.as_bytes() {
                return Ok(index);
            }
        }

        Err(Error::FieldNotFound(name.to_string()))
    }

    pub fn field_name(&self, index: usize) -> Result<&'a str> {
        self.check_index(index)?;
        let name = unsafe { libsqlite3_sys::sqlite3_column_name(self.stmt, index as c_int) };
        self.c_text(name)?
            .ok_or_else(|| Error::EngineError(crate::status::describe_status(libsqlite3_sys::SQLITE_NOMEM)))
    }

    /// Declared type of the column, `None` for expressions without a declared type
    pub fn field_decl_type(&self, index: usize) -> Result<Option<&'a str>> {
        self.check_index(index)?;
        let decl_type = unsafe { libsqlite3_sys::sqlite3_column_decltype(self.stmt, index as c_int) };
        self.c_text(decl_type)
    }

    pub fn field_data_type(&self, field: impl FieldIndex) -> Result<ColumnType> {
        let index = field.field_index(self)?;
        let column_type = unsafe { libsqlite3_sys::sqlite3_column_type(self.stmt, index as c_int) };
        match column_type {
            libsqlite3_sys::SQLITE_INTEGER => Ok(ColumnType::Integer),
            libsqlite3_sys::SQLITE_FLOAT => Ok(ColumnType::Float),
            libsqlite3_sys::SQLITE_BLOB => Ok(ColumnType::Blob),
            libsqlite3_sys::SQLITE_NULL => Ok(ColumnType::Null),
            libsqlite3_sys::SQLITE_TEXT => Ok(ColumnType::Text),
            _ => Err(Error::EngineError(format!("Invalid column type {column_type}"))),
        }
    }

    pub fn field_is_null(&self, field: impl FieldIndex) -> Result<bool> {
        Ok(self.field_data_type(field)? == ColumnType::Null)
    }

    pub fn int_field(&self, field: impl FieldIndex, null_value: i32) -> Result<i32> {
        let index = field.field_index(self)?;
        if self.field_is_null(index)? {
            return Ok(null_value);
        }

        Ok(unsafe { libsqlite3_sys::sqlite3_column_int(self.stmt, index as c_int) })
    }

    pub fn int64_field(&self, field: impl FieldIndex, null_value: i64) -> Result<i64> {
        let index = field.field_index(self)?;
        if self.field_is_null(index)? {
            return Ok(null_value);
        }

        Ok(unsafe { libsqlite3_sys::sqlite3_column_int64(self.stmt, index as c_int) })
    }

    pub fn float_field(&self, field: impl FieldIndex, null_value: f64) -> Result<f64> {
        let index = field.field_index(self)?;
        if self.field_is_null(index)? {
            return Ok(null_value);
        }

        Ok(unsafe { libsqlite3_sys::sqlite3_column_double(self.stmt, index as c_int) })
    }

    pub fn string_field<'s>(&self, field: impl FieldIndex, null_value: &'s str) -> Result<&'s str>
    where
        'a: 's,
    {
        let index = field.field_index(self)?;
        if self.field_is_null(index)? {
            return Ok(null_value);
        }

        // the text pointer has to be fetched before the byte count
        let data = unsafe { libsqlite3_sys::sqlite3_column_text(self.stmt, index as c_int) };
        let size = unsafe { libsqlite3_sys::sqlite3_column_bytes(self.stmt, index as c_int) };
        if data.is_null() || size <= 0 {
            return Ok("");
        }

        let bytes = unsafe { slice::from_raw_parts(data, size as usize) };
        Ok(std::str::from_utf8(bytes)?)
    }

    /// Raw bytes of the cell, NULL yields an empty slice
    pub fn blob_field(&self, field: impl FieldIndex) -> Result<&'a [u8]> {
        let index = field.field_index(self)?;
        let data = unsafe { libsqlite3_sys::sqlite3_column_blob(self.stmt, index as c_int) };
        let size = unsafe { libsqlite3_sys::sqlite3_column_bytes(self.stmt, index as c_int) };
        if data.is_null() || size <= 0 {
            return Ok(&[]);
        }

        Ok(unsafe { slice::from_raw_parts(data.cast::<u8>(), size as usize) })
    }

    /// Typed access using the default null substitutes
    pub fn get<T: FromField<'a>>(&self, field: impl FieldIndex) -> Result<T> {
        let index = field.field_index(self)?;
        T::from_field(self, index)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.num_fields() {
            return Err(Error::IndexOutOfRange(index));
        }

        Ok(())
    }

    fn c_text(&self, text: *const c_char) -> Result<Option<&'a str>> {
        if text.is_null() {
            return Ok(None);
        }

        Ok(Some(unsafe { CStr::from_ptr(text) }.to_str()?))
    }
}

impl std::fmt::Debug for Row<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Row").field("num_fields", &self.num_fields()).finish()
    }
}
