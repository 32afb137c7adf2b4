// Override template CRUD. Templates are soft-deleted; the transactional
// bulk application lives in engine/templates.rs on top of
// update_channels_settings_tx.

use rusqlite::{params, Row};

use super::GatewayStore;
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::engine::overrides::{
    normalize_override_parameters, validate_override_headers, validate_override_parameters,
};
use crate::engine::types::{ChannelType, HeaderOverride, OverrideTemplate};

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<OverrideTemplate> {
    let channel_type: String = row.get(4)?;
    let headers: String = row.get(6)?;
    Ok(OverrideTemplate {
        id: row.get(0)?,
        user_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        channel_type: ChannelType::parse(&channel_type).unwrap_or(ChannelType::Custom),
        override_parameters: row.get(5)?,
        override_headers: serde_json::from_str::<Vec<HeaderOverride>>(&headers)
            .unwrap_or_default(),
    })
}

const TEMPLATE_COLS: &str =
    "id, user_id, name, description, channel_type, override_parameters, override_headers";

fn validate_template(t: &OverrideTemplate) -> GatewayResult<()> {
    if t.name.trim().is_empty() {
        return Err(GatewayError::validation("template name must not be blank"));
    }
    validate_override_headers(&t.override_headers)?;
    validate_override_parameters(&t.override_parameters)?;
    Ok(())
}

impl GatewayStore {
    // ── Template CRUD ──────────────────────────────────────────────────

    pub fn create_template(&self, t: &OverrideTemplate) -> GatewayResult<OverrideTemplate> {
        validate_template(t)?;
        let conn = self.conn();
        conn.execute(
            "INSERT INTO channel_override_templates \
             (user_id, name, description, channel_type, override_parameters, override_headers) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                t.user_id,
                t.name,
                t.description,
                t.channel_type.as_str(),
                normalize_override_parameters(&t.override_parameters),
                serde_json::to_string(&t.override_headers)?,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_template(id)
    }

    pub fn get_template(&self, id: i64) -> GatewayResult<OverrideTemplate> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {TEMPLATE_COLS} FROM channel_override_templates \
                 WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id],
            row_to_template,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                GatewayError::not_found(format!("template {}", id))
            }
            other => other.into(),
        })
    }

    pub fn list_templates(&self) -> GatewayResult<Vec<OverrideTemplate>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLS} FROM channel_override_templates \
             WHERE deleted_at IS NULL ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], row_to_template)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    pub fn update_template(&self, t: &OverrideTemplate) -> GatewayResult<()> {
        validate_template(t)?;
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE channel_override_templates SET name = ?1, description = ?2, \
             channel_type = ?3, override_parameters = ?4, override_headers = ?5, \
             updated_at = strftime('%Y-%m-%d %H:%M:%f','now') \
             WHERE id = ?6 AND deleted_at IS NULL",
            params![
                t.name,
                t.description,
                t.channel_type.as_str(),
                normalize_override_parameters(&t.override_parameters),
                serde_json::to_string(&t.override_headers)?,
                t.id,
            ],
        )?;
        if updated == 0 {
            return Err(GatewayError::not_found(format!("template {}", t.id)));
        }
        Ok(())
    }

    pub fn delete_template(&self, id: i64) -> GatewayResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            "UPDATE channel_override_templates \
             SET deleted_at = strftime('%Y-%m-%d %H:%M:%f','now') \
             WHERE id = ?1 AND deleted_at IS NULL",
            params![id],
        )?;
        if updated == 0 {
            return Err(GatewayError::not_found(format!("template {}", id)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(name: &str) -> OverrideTemplate {
        OverrideTemplate {
            id: 0,
            user_id: 1,
            name: name.into(),
            description: String::new(),
            channel_type: ChannelType::OpenAi,
            override_parameters: String::new(),
            override_headers: vec![],
        }
    }

    #[test]
    fn blank_parameters_normalize_to_empty_object() {
        let store = GatewayStore::open_in_memory().unwrap();
        let t = store.create_template(&template("t1")).unwrap();
        assert_eq!(t.override_parameters, "{}");
    }

    #[test]
    fn soft_delete_hides_template() {
        let store = GatewayStore::open_in_memory().unwrap();
        let t = store.create_template(&template("t1")).unwrap();
        store.delete_template(t.id).unwrap();
        assert!(matches!(
            store.get_template(t.id).unwrap_err(),
            GatewayError::NotFound(_)
        ));
        assert!(store.list_templates().unwrap().is_empty());
    }

    #[test]
    fn stream_key_rejected_in_template_parameters() {
        let store = GatewayStore::open_in_memory().unwrap();
        let mut t = template("t1");
        t.override_parameters = r#"{"stream":true}"#.into();
        assert!(store.create_template(&t).is_err());
    }
}
