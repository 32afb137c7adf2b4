// Database schema and migrations for the gateway store.
// Called once at startup by GatewayStore::open().
// Adding a new table or column: append an idempotent CREATE TABLE IF NOT
// EXISTS or ALTER TABLE … ADD COLUMN at the end of run_migrations() —
// never modify existing SQL to keep upgrade paths clean.

use rusqlite::Connection;

use crate::atoms::constants::DEFAULT_PROJECT_NAME;
use crate::atoms::error::GatewayResult;

pub(crate) fn run_migrations(conn: &Connection) -> GatewayResult<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS channels (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            channel_type TEXT NOT NULL,
            base_url TEXT,
            credentials TEXT NOT NULL DEFAULT '{}',
            status TEXT NOT NULL DEFAULT 'enabled',
            weight INTEGER NOT NULL DEFAULT 0,
            supported_models TEXT NOT NULL DEFAULT '[]',
            auto_sync INTEGER NOT NULL DEFAULT 0,
            default_test_model TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            settings TEXT NOT NULL DEFAULT '{}',
            error_message TEXT,
            deleted_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Name uniqueness holds among live rows; soft-deleted rows keep
        -- their name for audit without blocking reuse.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_channels_name
            ON channels(name) WHERE deleted_at IS NULL;
        CREATE INDEX IF NOT EXISTS idx_channels_status
            ON channels(status, weight DESC);
        CREATE INDEX IF NOT EXISTS idx_channels_updated
            ON channels(updated_at DESC);

        CREATE TABLE IF NOT EXISTS models (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            developer TEXT NOT NULL,
            model_id TEXT NOT NULL,
            display_name TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(developer, model_id)
        );

        CREATE TABLE IF NOT EXISTS channel_model_prices (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id INTEGER NOT NULL,
            model_id TEXT NOT NULL,
            input_price REAL NOT NULL DEFAULT 0,
            output_price REAL NOT NULL DEFAULT 0,
            reference_id TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(channel_id, model_id),
            FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
        );

        CREATE TABLE IF NOT EXISTS channel_override_templates (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL DEFAULT 0,
            name TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            channel_type TEXT NOT NULL,
            override_parameters TEXT NOT NULL DEFAULT '{}',
            override_headers TEXT NOT NULL DEFAULT '[]',
            deleted_at TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS projects (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS api_keys (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            key TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL DEFAULT '',
            project_id INTEGER NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
        );
        ",
    )?;

    // Every deployment carries the fallback project restores bind to.
    conn.execute(
        "INSERT OR IGNORE INTO projects (name) VALUES (?1)",
        [DEFAULT_PROJECT_NAME],
    )?;

    Ok(())
}
