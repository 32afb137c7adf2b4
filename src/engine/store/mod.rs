// Modelgate Engine — Gateway Store
// Persists channels, models, prices, override templates, API keys, and
// projects in SQLite via rusqlite, behind its own connection mutex.
//
// Module layout:
//   channels   — channel CRUD, status writes, key rotation, reload cursor
//   models     — model catalog CRUD
//   prices     — per-(channel, model) pricing rows
//   templates  — override template CRUD (soft delete) + transactional
//                settings application
//   api_keys   — API keys and projects

use log::info;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::PathBuf;

use crate::atoms::error::GatewayResult;

mod api_keys;
pub(crate) mod channels;
mod models;
mod prices;
mod schema;
mod templates;

/// Get the path to the gateway's SQLite database.
pub fn gateway_db_path() -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("modelgate").join("gateway.db")
}

/// Thread-safe database wrapper.
pub struct GatewayStore {
    /// The SQLite connection, protected by a Mutex.
    conn: Mutex<Connection>,
}

impl GatewayStore {
    /// Open (or create) the gateway database and initialize tables.
    pub fn open() -> GatewayResult<Self> {
        let path = gateway_db_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        info!("[store] Opening gateway store at {:?}", path);

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;").ok();
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();

        schema::run_migrations(&conn)?;

        Ok(GatewayStore {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store with the full schema. Used by unit tests.
    pub fn open_in_memory() -> GatewayResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;").ok();
        schema::run_migrations(&conn)?;
        Ok(GatewayStore {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> parking_lot::MutexGuard<'_, Connection> {
        self.conn.lock()
    }
}
