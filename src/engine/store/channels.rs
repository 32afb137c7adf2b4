// Channel CRUD + the incremental-reload cursor.
// JSON-typed columns (credentials, supported_models, tags, settings) are
// stored as TEXT and parsed on read. `updated_at` is written with
// millisecond precision because it drives the cache's early-exit check.

use log::info;
use rusqlite::{params, Row};

use super::GatewayStore;
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::engine::overrides::{
    normalize_override_parameters, validate_override_headers, validate_override_parameters,
};
use crate::engine::types::*;

const TOUCH: &str = "strftime('%Y-%m-%d %H:%M:%f','now')";

const CHANNEL_COLS: &str = "id, name, channel_type, base_url, credentials, status, weight, \
     supported_models, auto_sync, default_test_model, tags, settings, error_message, \
     created_at, updated_at";

pub(crate) fn row_to_channel(row: &Row<'_>) -> rusqlite::Result<Channel> {
    let channel_type: String = row.get(2)?;
    let credentials: String = row.get(4)?;
    let status: String = row.get(5)?;
    let supported_models: String = row.get(7)?;
    let tags: String = row.get(10)?;
    let settings: String = row.get(11)?;
    Ok(Channel {
        id: row.get(0)?,
        name: row.get(1)?,
        channel_type: ChannelType::parse(&channel_type).unwrap_or(ChannelType::Custom),
        base_url: row.get(3)?,
        credentials: serde_json::from_str(&credentials)
            .unwrap_or(Credentials::ApiKey(String::new())),
        status: ChannelStatus::parse(&status).unwrap_or(ChannelStatus::Disabled),
        weight: row.get(6)?,
        supported_models: serde_json::from_str(&supported_models).unwrap_or_default(),
        auto_sync: row.get::<_, i64>(8)? != 0,
        default_test_model: row.get(9)?,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        settings: serde_json::from_str(&settings).unwrap_or_default(),
        error_message: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

/// Admin-write validation: shape, headers, parameters.
fn validate_channel(ch: &Channel) -> GatewayResult<()> {
    if ch.name.trim().is_empty() {
        return Err(GatewayError::validation("channel name must not be blank"));
    }
    ch.credentials.validate_for(ch.channel_type)?;
    validate_override_headers(&ch.settings.override_headers)?;
    validate_override_parameters(&ch.settings.override_parameters)?;
    Ok(())
}

impl GatewayStore {
    // ── Channel CRUD ───────────────────────────────────────────────────

    pub fn create_channel(&self, ch: &Channel) -> GatewayResult<Channel> {
        validate_channel(ch)?;
        let conn = self.conn();

        let exists: bool = conn
            .prepare("SELECT 1 FROM channels WHERE name = ?1 AND deleted_at IS NULL")?
            .query_row(params![ch.name], |_| Ok(true))
            .unwrap_or(false);
        if exists {
            return Err(GatewayError::conflict(format!(
                "channel '{}' already exists",
                ch.name
            )));
        }

        let mut settings = ch.settings.clone();
        settings.override_parameters =
            normalize_override_parameters(&settings.override_parameters);

        conn.execute(
            &format!(
                "INSERT INTO channels (name, channel_type, base_url, credentials, status, \
                 weight, supported_models, auto_sync, default_test_model, tags, settings, \
                 created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, {TOUCH}, {TOUCH})"
            ),
            params![
                ch.name,
                ch.channel_type.as_str(),
                ch.base_url,
                serde_json::to_string(&ch.credentials)?,
                ch.status.as_str(),
                ch.weight,
                serde_json::to_string(&ch.supported_models)?,
                ch.auto_sync as i64,
                ch.default_test_model,
                serde_json::to_string(&ch.tags)?,
                serde_json::to_string(&settings)?,
            ],
        )?;
        let id = conn.last_insert_rowid();
        drop(conn);
        info!("[store] Created channel '{}' (id {})", ch.name, id);
        self.get_channel(id)
    }

    pub fn get_channel(&self, id: i64) -> GatewayResult<Channel> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CHANNEL_COLS} FROM channels WHERE id = ?1 AND deleted_at IS NULL"),
            params![id],
            row_to_channel,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => {
                GatewayError::not_found(format!("channel {}", id))
            }
            other => other.into(),
        })
    }

    pub fn get_channel_by_name(&self, name: &str) -> GatewayResult<Option<Channel>> {
        let conn = self.conn();
        match conn.query_row(
            &format!("SELECT {CHANNEL_COLS} FROM channels WHERE name = ?1 AND deleted_at IS NULL"),
            params![name],
            row_to_channel,
        ) {
            Ok(ch) => Ok(Some(ch)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list_channels(&self) -> GatewayResult<Vec<Channel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLS} FROM channels WHERE deleted_at IS NULL ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], row_to_channel)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Enabled channels in selection order: descending weight, then stable id.
    pub fn list_enabled_channels(&self) -> GatewayResult<Vec<Channel>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {CHANNEL_COLS} FROM channels \
             WHERE status = 'enabled' AND deleted_at IS NULL \
             ORDER BY weight DESC, id ASC"
        ))?;
        let rows = stmt
            .query_map([], row_to_channel)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }

    /// Full admin update. A successful update clears the error message,
    /// which is how a disabled channel returns to service.
    pub fn update_channel(&self, ch: &Channel) -> GatewayResult<()> {
        validate_channel(ch)?;
        let mut settings = ch.settings.clone();
        settings.override_parameters =
            normalize_override_parameters(&settings.override_parameters);

        let conn = self.conn();
        // Renames must not collide with another live channel.
        let taken: bool = conn
            .prepare("SELECT 1 FROM channels WHERE name = ?1 AND id != ?2 AND deleted_at IS NULL")?
            .query_row(params![ch.name, ch.id], |_| Ok(true))
            .unwrap_or(false);
        if taken {
            return Err(GatewayError::conflict(format!(
                "channel '{}' already exists",
                ch.name
            )));
        }

        let updated = conn.execute(
            &format!(
                "UPDATE channels SET name = ?1, channel_type = ?2, base_url = ?3, \
                 credentials = ?4, status = ?5, weight = ?6, supported_models = ?7, \
                 auto_sync = ?8, default_test_model = ?9, tags = ?10, settings = ?11, \
                 error_message = NULL, updated_at = {TOUCH} \
                 WHERE id = ?12 AND deleted_at IS NULL"
            ),
            params![
                ch.name,
                ch.channel_type.as_str(),
                ch.base_url,
                serde_json::to_string(&ch.credentials)?,
                ch.status.as_str(),
                ch.weight,
                serde_json::to_string(&ch.supported_models)?,
                ch.auto_sync as i64,
                ch.default_test_model,
                serde_json::to_string(&ch.tags)?,
                serde_json::to_string(&settings)?,
                ch.id,
            ],
        )?;
        if updated == 0 {
            return Err(GatewayError::not_found(format!("channel {}", ch.id)));
        }
        Ok(())
    }

    /// Status-only write used by the auto-disable controller and by channel
    /// testing (success path clears the error message).
    pub fn set_channel_status(
        &self,
        id: i64,
        status: ChannelStatus,
        error_message: Option<&str>,
    ) -> GatewayResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            &format!(
                "UPDATE channels SET status = ?1, error_message = ?2, updated_at = {TOUCH} \
                 WHERE id = ?3 AND deleted_at IS NULL"
            ),
            params![status.as_str(), error_message, id],
        )?;
        if updated == 0 {
            return Err(GatewayError::not_found(format!("channel {}", id)));
        }
        Ok(())
    }

    /// Drop a failed key from the channel's rotating credentials list.
    /// Returns true when keys remain; with none left the channel is
    /// disabled instead.
    pub fn rotate_channel_key(&self, id: i64, failed_key: &str) -> GatewayResult<bool> {
        let mut ch = self.get_channel(id)?;
        let remains = ch.credentials.rotate_away(failed_key);
        if remains {
            let conn = self.conn();
            conn.execute(
                &format!(
                    "UPDATE channels SET credentials = ?1, updated_at = {TOUCH} \
                     WHERE id = ?2 AND deleted_at IS NULL"
                ),
                params![serde_json::to_string(&ch.credentials)?, id],
            )?;
            info!("[store] Rotated failed key out of channel {}", id);
        } else {
            self.set_channel_status(
                id,
                ChannelStatus::Disabled,
                Some("no usable API keys remain"),
            )?;
            info!("[store] Channel {} disabled — key list exhausted", id);
        }
        Ok(remains)
    }

    /// Soft delete; the row keeps its name for audit.
    pub fn delete_channel(&self, id: i64) -> GatewayResult<()> {
        let conn = self.conn();
        let updated = conn.execute(
            &format!(
                "UPDATE channels SET deleted_at = {TOUCH}, updated_at = {TOUCH} \
                 WHERE id = ?1 AND deleted_at IS NULL"
            ),
            params![id],
        )?;
        if updated == 0 {
            return Err(GatewayError::not_found(format!("channel {}", id)));
        }
        Ok(())
    }

    /// Greatest `updated_at` across all channels — the cache's reload
    /// cursor. Includes disabled and deleted rows so any mutation is
    /// observable.
    pub fn max_channel_updated_at(&self) -> GatewayResult<Option<String>> {
        let conn = self.conn();
        let max: Option<String> =
            conn.query_row("SELECT MAX(updated_at) FROM channels", [], |row| row.get(0))?;
        Ok(max)
    }

    /// Persist new settings for a batch of channels inside one
    /// transaction. Any failure rolls the whole batch back.
    pub fn update_channels_settings_tx(
        &self,
        updates: &[(i64, ChannelSettings)],
    ) -> GatewayResult<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        for (id, settings) in updates {
            let changed = tx.execute(
                &format!(
                    "UPDATE channels SET settings = ?1, updated_at = {TOUCH} \
                     WHERE id = ?2 AND deleted_at IS NULL"
                ),
                params![serde_json::to_string(settings)?, id],
            )?;
            if changed == 0 {
                return Err(GatewayError::not_found(format!("channel {}", id)));
            }
        }
        tx.commit()?;
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
