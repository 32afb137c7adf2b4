// Model catalog CRUD. Models are identified by (developer, model_id).

use rusqlite::{params, Row};

use super::GatewayStore;
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::engine::types::Model;

fn row_to_model(row: &Row<'_>) -> rusqlite::Result<Model> {
    Ok(Model {
        id: row.get(0)?,
        developer: row.get(1)?,
        model_id: row.get(2)?,
        display_name: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

const MODEL_COLS: &str = "id, developer, model_id, display_name, created_at, updated_at";

impl GatewayStore {
    // ── Model CRUD ─────────────────────────────────────────────────────

    pub fn create_model(&self, m: &Model) -> GatewayResult<Model> {
        let conn = self.conn();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO models (developer, model_id, display_name) \
             VALUES (?1, ?2, ?3)",
            params![m.developer, m.model_id, m.display_name],
        )?;
        if inserted == 0 {
            return Err(GatewayError::conflict(format!(
                "model {}/{} already exists",
                m.developer, m.model_id
            )));
        }
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_model(id)
    }

    pub fn get_model(&self, id: i64) -> GatewayResult<Model> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {MODEL_COLS} FROM models WHERE id = ?1"),
            params![id],
            row_to_model,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                GatewayError::not_found(format!("model {}", id))
            }
            other => other.into(),
        })
    }

    pub fn get_model_by_key(
        &self,
        developer: &str,
        model_id: &str,
    ) -> GatewayResult<Option<Model>> {
        let conn = self.conn();
        match conn.query_row(
            &format!("SELECT {MODEL_COLS} FROM models WHERE developer = ?1 AND model_id = ?2"),
            params![developer, model_id],
            row_to_model,
        ) {
            Ok(m) => Ok(Some(m)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_models(&self) -> GatewayResult<Vec<Model>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {MODEL_COLS} FROM models ORDER BY developer, model_id"
        ))?;
        let rows = stmt
            .query_map([], row_to_model)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn update_model(&self, m: &Model) -> GatewayResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE models SET developer = ?1, model_id = ?2, display_name = ?3, \
             updated_at = strftime('%Y-%m-%d %H:%M:%f','now') WHERE id = ?4",
            params![m.developer, m.model_id, m.display_name, m.id],
        )?;
        if updated == 0 {
            return Err(GatewayError::not_found(format!("model {}", m.id)));
        }
        Ok(())
    }
}
