use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use env_logger::{Env, TimestampPrecision};
use inf::duration::Recorder;
use sqlite::{AccessMode, ColumnType, Connection, OpenOptions, Row, Statement};

pub type Result<T> = inf::Result<T>;

#[derive(Parser, Debug)]
#[clap(name = "sqlquery", about = "Run SQL against a SQLite database")]
pub struct Opt {
    #[clap(long = "db", short = 'd', env = "SQLQUERY_DB")]
    pub db: PathBuf,

    /// Exclusive locking with write-ahead logging
    #[clap(long = "exclusive-wal")]
    pub exclusive_wal: bool,

    #[clap(long = "read-only")]
    pub read_only: bool,

    /// Busy timeout in milliseconds
    #[clap(long = "busy-timeout", default_value_t = 60_000)]
    pub busy_timeout: u64,

    /// Log every executed statement
    #[clap(long = "trace")]
    pub trace: bool,

    /// SQL file to execute, may contain multiple statements
    #[clap(long = "file", short = 'f', conflicts_with = "sql")]
    pub file: Option<PathBuf>,

    /// Single statement to run, result rows are printed tab separated
    pub sql: Option<String>,
}

fn cell_text(row: &Row, index: usize) -> Result<String> {
    Ok(match row.field_data_type(index)? {
        ColumnType::Null => "NULL".to_string(),
        ColumnType::Blob => format!("<blob {} bytes>", row.blob_field(index)?.len()),
        _ => row.string_field(index, "")?.to_string(),
    })
}

fn print_rows(stmt: &mut Statement) -> Result<usize> {
    if !stmt.has_row() {
        return Ok(0);
    }

    let header = {
        let row = stmt.current_row()?;
        (0..row.num_fields())
            .map(|i| row.field_name(i).map(str::to_string))
            .collect::<Result<Vec<_>>>()?
    };
    println!("{}", header.join("\t"));

    let rows = stmt.map_rows(|row| {
        let cells = (0..row.num_fields())
            .map(|i| cell_text(&row, i))
            .collect::<Result<Vec<_>>>()?;
        println!("{}", cells.join("\t"));
        Ok(())
    })?;

    Ok(rows.len())
}

fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(Env::default().default_filter_or(if opt.trace { "debug" } else { "warn" }))
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let options = OpenOptions::builder()
        .access_mode(if opt.read_only {
            AccessMode::ReadOnly
        } else {
            AccessMode::Create
        })
        .exclusive_wal(opt.exclusive_wal)
        .busy_timeout(Duration::from_millis(opt.busy_timeout))
        .build();

    let mut conn = Connection::open_with_options(&opt.db, &options)?;
    if opt.trace {
        conn.enable_trace_logging()?;
    }

    let recorder = Recorder::new();
    if let Some(file) = &opt.file {
        conn.execute_sql_file(file)?;
        log::info!("Executed {} in {recorder}", file.display());
    } else if let Some(sql) = &opt.sql {
        let mut stmt = conn.compile(sql)?;
        stmt.execute()?;
        let row_count = print_rows(&mut stmt)?;
        drop(stmt);
        eprintln!(
            "{row_count} rows, {} changed ({recorder})",
            conn.number_of_rows_changed()?
        );
    } else {
        return Err(inf::Error::InvalidArgument("Provide a SQL statement or --file".to_string()));
    }

    conn.close()?;
    Ok(())
}
