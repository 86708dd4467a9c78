use std::path::Path;

use log::info;
use rusqlite::Connection;

use crate::db::Ledger;

static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/db/schema.sql"));

pub fn open_db(path: &Path) -> rusqlite::Result<Ledger> {
    if !path.exists() { info!("Creating new database {}", path.display()) }
    let conn = Connection::open(path)?;
    init(conn)
}

/// Ledger that lives as long as the process
pub fn open_in_memory() -> rusqlite::Result<Ledger> {
    init(Connection::open_in_memory()?)
}

fn init(conn: Connection) -> rusqlite::Result<Ledger> {
    conn.execute_batch(SCHEMA)?;
    Ok(Ledger { conn })
}
