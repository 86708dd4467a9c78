//! Job history is stored in a SQLite database

use rusqlite::Connection;

/// Connect to a SQLite database
pub mod open;
/// Record job requests, state transitions and outcomes
pub mod job;

/// Optional record of every job the pipeline ran
pub struct Ledger {
    conn: Connection,
}
