//! SQL aware string formatting on top of the engine's own printf implementation
//!
//! Besides the usual numeric and string conversions the engine understands:
//! - `%q`: like `%s`, but every single quote is doubled so the result can be placed inside a string literal
//! - `%Q`: like `%q`, but the result is wrapped in single quotes and a missing value renders as `NULL`
//! - `%w`: like `%q`, but doubles double quotes, for use inside quoted identifiers
//! - `%z`: like `%s`, the argument is consumed by the call
//!
//! Prefer `%q` and `%Q` over `%s` for anything that ends up inside SQL text.
//! Each conversion is rendered by a separate `sqlite3_mprintf` call so the output is byte-for-byte
//! what the engine would produce for the whole format string.

use crate::{Error, Result};
use std::ffi::{CStr, CString, c_char, c_double, c_int, c_longlong};

const FLAG_CHARS: &[u8] = b"-+ #0!,";

/// A single argument for a format string
#[derive(Debug, Clone, PartialEq)]
pub enum FormatArg<'a> {
    Int(i32),
    Int64(i64),
    Double(f64),
    /// `None` is passed to the engine as a null pointer (rendered as `NULL` by `%Q`)
    Text(Option<&'a str>),
    /// Owned text, meant for `%z`
    Owned(String),
}

impl From<i32> for FormatArg<'_> {
    fn from(v: i32) -> Self {
        FormatArg::Int(v)
    }
}

impl From<i64> for FormatArg<'_> {
    fn from(v: i64) -> Self {
        FormatArg::Int64(v)
    }
}

impl From<f64> for FormatArg<'_> {
    fn from(v: f64) -> Self {
        FormatArg::Double(v)
    }
}

impl<'a> From<&'a str> for FormatArg<'a> {
    fn from(v: &'a str) -> Self {
        FormatArg::Text(Some(v))
    }
}

impl<'a> From<&'a String> for FormatArg<'a> {
    fn from(v: &'a String) -> Self {
        FormatArg::Text(Some(v.as_str()))
    }
}

impl<'a> From<Option<&'a str>> for FormatArg<'a> {
    fn from(v: Option<&'a str>) -> Self {
        FormatArg::Text(v)
    }
}

impl From<String> for FormatArg<'_> {
    fn from(v: String) -> Self {
        FormatArg::Owned(v)
    }
}

/// Build a `&[FormatArg]` from a list of values
///
/// ```ignore
/// conn.exec("INSERT INTO t(name, age) VALUES(%Q, %d)", sql_args!["O'Brien", 42])?;
/// ```
#[macro_export]
macro_rules! sql_args {
    () => {
        &[] as &[$crate::FormatArg]
    };
    ($($arg:expr),+ $(,)?) => {
        &[$($crate::FormatArg::from($arg)),+]
    };
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum ArgKind {
    Integer,
    Float,
    Text,
}

fn conversion_kind(conversion: u8) -> Option<ArgKind> {
    match conversion {
        b'd' | b'i' | b'u' | b'x' | b'X' | b'o' | b'c' => Some(ArgKind::Integer),
        b'f' | b'e' | b'E' | b'g' | b'G' => Some(ArgKind::Float),
        b's' | b'q' | b'Q' | b'w' | b'z' => Some(ArgKind::Text),
        _ => None,
    }
}

/// Apply the format string to the arguments
pub fn format_sql(format: &str, args: &[FormatArg]) -> Result<String> {
    let bytes = format.as_bytes();
    let mut output = String::with_capacity(format.len());
    let mut args = args.iter();
    let mut literal_start = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'%' {
            pos += 1;
            continue;
        }

        output.push_str(&format[literal_start..pos]);
        let spec_start = pos;
        pos += 1;

        if bytes.get(pos) == Some(&b'%') {
            output.push('%');
            pos += 1;
            literal_start = pos;
            continue;
        }

        let mut spec = String::from("%");
        while let Some(&c) = bytes.get(pos).filter(|c| FLAG_CHARS.contains(*c)) {
            spec.push(c as char);
            pos += 1;
        }
        while let Some(&c) = bytes.get(pos).filter(|c| c.is_ascii_digit()) {
            spec.push(c as char);
            pos += 1;
        }
        if bytes.get(pos) == Some(&b'.') {
            spec.push('.');
            pos += 1;
            while let Some(&c) = bytes.get(pos).filter(|c| c.is_ascii_digit()) {
                spec.push(c as char);
                pos += 1;
            }
        }
        // the length modifier is derived from the argument type
        while bytes.get(pos) == Some(&b'l') {
            pos += 1;
        }

        let conversion = match bytes.get(pos) {
            Some(&c) if c != b'*' => c,
            Some(_) => {
                return Err(Error::InvalidArgument(format!(
                    "Variable width or precision is not supported: '{}'",
                    &format[spec_start..=pos]
                )));
            }
            None => {
                return Err(Error::InvalidArgument(format!(
                    "Incomplete format specifier at the end of '{format}'"
                )));
            }
        };

        // the conversion may be a multi byte character, report the remainder instead of slicing inside it
        let kind = conversion_kind(conversion).ok_or_else(|| {
            Error::InvalidArgument(format!(
                "Unsupported format specifier '{}'",
                format.get(spec_start..=pos).unwrap_or(&format[spec_start..])
            ))
        })?;
        pos += 1;

        let arg = args.next().ok_or_else(|| {
            Error::InvalidArgument(format!("Not enough arguments for format string '{format}'"))
        })?;

        output.push_str(&format_conversion(spec, conversion, kind, arg)?);
        literal_start = pos;
    }

    output.push_str(&format[literal_start..]);

    if args.next().is_some() {
        return Err(Error::InvalidArgument(format!(
            "Too many arguments for format string '{format}'"
        )));
    }

    Ok(output)
}

/// Format a single text value with one conversion character (`'q'`, `'Q'`, `'w'`, `'s'`)
pub fn format_value(conversion: char, value: Option<&str>) -> Result<String> {
    format_sql(&format!("%{conversion}"), &[FormatArg::Text(value)])
}

fn format_conversion(mut spec: String, conversion: u8, kind: ArgKind, arg: &FormatArg) -> Result<String> {
    let formatted = match (kind, arg) {
        (ArgKind::Integer, FormatArg::Int(v)) => {
            spec.push(conversion as char);
            let c_spec = CString::new(spec)?;
            unsafe { libsqlite3_sys::sqlite3_mprintf(c_spec.as_ptr(), *v as c_int) }
        }
        (ArgKind::Integer, FormatArg::Int64(v)) => {
            spec.push_str("ll");
            spec.push(conversion as char);
            let c_spec = CString::new(spec)?;
            unsafe { libsqlite3_sys::sqlite3_mprintf(c_spec.as_ptr(), *v as c_longlong) }
        }
        (ArgKind::Float, FormatArg::Double(v)) => {
            spec.push(conversion as char);
            let c_spec = CString::new(spec)?;
            unsafe { libsqlite3_sys::sqlite3_mprintf(c_spec.as_ptr(), *v as c_double) }
        }
        (ArgKind::Text, FormatArg::Text(v)) => {
            spec.push(conversion as char);
            mprintf_text(spec, *v)?
        }
        (ArgKind::Text, FormatArg::Owned(v)) => {
            // the engine would free a %z argument with its own allocator, ownership of the
            // Rust string is consumed here instead
            spec.push(if conversion == b'z' { 's' } else { conversion as char });
            mprintf_text(spec, Some(v.as_str()))?
        }
        _ => {
            return Err(Error::InvalidArgument(format!(
                "Argument {arg:?} does not match format specifier '{spec}{}'",
                conversion as char
            )));
        }
    };

    take_engine_string(formatted)
}

fn mprintf_text(spec: String, value: Option<&str>) -> Result<*mut c_char> {
    let c_spec = CString::new(spec)?;
    let c_value = value.map(CString::new).transpose()?;
    let value_ptr = c_value.as_ref().map_or(std::ptr::null(), |v| v.as_ptr());
    Ok(unsafe { libsqlite3_sys::sqlite3_mprintf(c_spec.as_ptr(), value_ptr) })
}

/// Copy a string allocated by the engine and release the engine buffer
fn take_engine_string(ptr: *mut c_char) -> Result<String> {
    if ptr.is_null() {
        return Err(Error::FormattingFailed);
    }

    let result = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    unsafe { libsqlite3_sys::sqlite3_free(ptr.cast()) };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_conversions() -> Result<()> {
        assert_eq!(format_sql("%q", sql_args!["O'Brien"])?, "O''Brien");
        assert_eq!(format_sql("%Q", sql_args!["O'Brien"])?, "'O''Brien'");
        assert_eq!(format_sql("%Q", &[FormatArg::Text(None)])?, "NULL");
        assert_eq!(format_sql("%s", sql_args!["O'Brien"])?, "O'Brien");
        assert_eq!(format_sql("\"%w\"", sql_args!["a\"b"])?, "\"a\"\"b\"");
        Ok(())
    }

    #[test]
    fn owned_text_with_z() -> Result<()> {
        let value = String::from("plain");
        assert_eq!(format_sql("[%z]", sql_args![value])?, "[plain]");
        assert_eq!(format_sql("%Q", sql_args![String::from("it's")])?, "'it''s'");
        Ok(())
    }

    #[test]
    fn numeric_conversions() -> Result<()> {
        assert_eq!(format_sql("%d|%5d|%-3d|", sql_args![42, 7, 1])?, "42|    7|1  |");
        assert_eq!(format_sql("%lld", sql_args![9_000_000_000_i64])?, "9000000000");
        assert_eq!(format_sql("%d", sql_args![-5_i64])?, "-5");
        assert_eq!(format_sql("%x", sql_args![255])?, "ff");
        assert_eq!(format_sql("%.2f", sql_args![3.14159])?, "3.14");
        Ok(())
    }

    #[test]
    fn mixed_statement() -> Result<()> {
        let sql = format_sql(
            "INSERT INTO t(id, name, score) VALUES(%d, %Q, %.1f)",
            sql_args![1, "Alice", 9.5],
        )?;
        assert_eq!(sql, "INSERT INTO t(id, name, score) VALUES(1, 'Alice', 9.5)");
        Ok(())
    }

    #[test]
    fn percent_literal_and_plain_text() -> Result<()> {
        assert_eq!(format_sql("100%% sure", sql_args![])?, "100% sure");
        assert_eq!(format_sql("SELECT 1", sql_args![])?, "SELECT 1");
        assert_eq!(format_sql("naïve %q", sql_args!["café"])?, "naïve café");
        Ok(())
    }

    #[test]
    fn argument_errors() {
        assert!(matches!(format_sql("%d %d", sql_args![1]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_sql("%d", sql_args![1, 2]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_sql("%d", sql_args!["x"]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_sql("%q", sql_args![1]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_sql("%*d", sql_args![1]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_sql("%y", sql_args![1]), Err(Error::InvalidArgument(_))));
        assert!(matches!(format_sql("trailing %", sql_args![]), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn embedded_nul_is_rejected() {
        assert!(matches!(format_sql("%q", sql_args!["a\0b"]), Err(Error::InvalidString(_))));
    }

    #[test]
    fn single_value() -> Result<()> {
        assert_eq!(format_value('q', Some("it's"))?, "it''s");
        assert_eq!(format_value('Q', None)?, "NULL");
        Ok(())
    }
}
