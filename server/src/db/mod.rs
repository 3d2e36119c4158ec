pub mod migrations;
pub mod models;

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

/// Shared handle to the single SQLite connection. rusqlite is synchronous,
/// so every query runs inside `tokio::task::spawn_blocking` while holding
/// the mutex.
pub type DbPool = Arc<Mutex<Connection>>;

/// Open `<data_dir>/gather.db`, creating the directory and file on first
/// run, and bring the schema up to date.
pub fn init_db(data_dir: &str) -> Result<DbPool, Box<dyn std::error::Error>> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = Path::new(data_dir).join("gather.db");

    let mut conn = Connection::open(&db_path)?;
    // WAL keeps readers unblocked during the write-heavy send path;
    // FK enforcement is off by default in SQLite.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    migrations::migrations().to_latest(&mut conn)?;
    tracing::info!(path = %db_path.display(), "Database ready");

    Ok(Arc::new(Mutex::new(conn)))
}
