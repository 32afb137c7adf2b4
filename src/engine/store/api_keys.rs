// API keys and their projects. Keys are unique by literal key string;
// restore matches on it.

use rusqlite::{params, OptionalExtension, Row};

use super::GatewayStore;
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::engine::types::{ApiKey, Project};

fn row_to_api_key(row: &Row<'_>) -> rusqlite::Result<ApiKey> {
    Ok(ApiKey {
        id: row.get(0)?,
        key: row.get(1)?,
        name: row.get(2)?,
        project_id: row.get(3)?,
    })
}

impl GatewayStore {
    // ── Projects ───────────────────────────────────────────────────────

    pub fn get_project_by_name(&self, name: &str) -> GatewayResult<Option<Project>> {
        let conn = self.conn();
        let project = conn
            .query_row(
                "SELECT id, name FROM projects WHERE name = ?1",
                params![name],
                |row| {
                    Ok(Project {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(project)
    }

    pub fn create_project(&self, name: &str) -> GatewayResult<Project> {
        if name.trim().is_empty() {
            return Err(GatewayError::validation("project name must not be blank"));
        }
        let conn = self.conn();
        conn.execute("INSERT OR IGNORE INTO projects (name) VALUES (?1)", params![name])?;
        drop(conn);
        self.get_project_by_name(name)?
            .ok_or_else(|| GatewayError::not_found(format!("project '{}'", name)))
    }

    // ── API keys ───────────────────────────────────────────────────────

    pub fn get_api_key(&self, key: &str) -> GatewayResult<Option<ApiKey>> {
        let conn = self.conn();
        let row = conn
            .query_row(
                "SELECT id, key, name, project_id FROM api_keys WHERE key = ?1",
                params![key],
                row_to_api_key,
            )
            .optional()?;
        Ok(row)
    }

    pub fn insert_api_key(&self, key: &str, name: &str, project_id: i64) -> GatewayResult<ApiKey> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO api_keys (key, name, project_id) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET name = ?2, project_id = ?3",
            params![key, name, project_id],
        )?;
        drop(conn);
        self.get_api_key(key)?
            .ok_or_else(|| GatewayError::not_found("api key just written".to_string()))
    }

    /// All keys joined with their project's name — the backup shape.
    pub fn list_api_keys_with_project_names(&self) -> GatewayResult<Vec<(ApiKey, String)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT k.id, k.key, k.name, k.project_id, p.name \
             FROM api_keys k JOIN projects p ON p.id = k.project_id \
             ORDER BY k.id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row_to_api_key(row)?, row.get::<_, String>(4)?))
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}
