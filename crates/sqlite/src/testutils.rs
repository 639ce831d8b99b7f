use crate::{Connection, Result};

pub fn memory_db() -> Result<Connection> {
    Connection::open_in_memory()
}

/// In-memory database with a `person(id, name, age)` table holding Alice, Bob and Carol
pub fn people_db() -> Result<Connection> {
    let conn = memory_db()?;
    conn.execute(
        "CREATE TABLE person(id INTEGER PRIMARY KEY, name TEXT, age INTEGER);
         INSERT INTO person(name, age) VALUES('Alice', 33);
         INSERT INTO person(name, age) VALUES('Bob', 45);
         INSERT INTO person(name, age) VALUES('Carol', 27);",
    )?;
    Ok(conn)
}
