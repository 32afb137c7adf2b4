// Modelgate Engine — Backup & Restore Orchestrator
// Serializes the full channel/model/price/key state with a version tag and
// restores it with a per-entity conflict policy inside one transaction.
// Owner-only at the entry points; everything below assumes privilege has
// been validated.

use std::sync::Arc;

use chrono::Utc;
use log::{info, warn};
use rusqlite::{params, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use crate::atoms::constants::{BACKUP_VERSION, BACKUP_VERSIONS_ACCEPTED, DEFAULT_PROJECT_NAME};
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::traits::AuthContext;
use crate::engine::cache::ChannelCache;
use crate::engine::overrides::normalize_override_parameters;
use crate::engine::store::GatewayStore;
use crate::engine::types::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreSummary {
    pub channels: usize,
    pub models: usize,
    pub prices: usize,
    pub api_keys: usize,
    pub skipped: usize,
}

pub struct BackupOrchestrator {
    store: Arc<GatewayStore>,
    cache: Arc<ChannelCache>,
}

impl BackupOrchestrator {
    pub fn new(store: Arc<GatewayStore>, cache: Arc<ChannelCache>) -> Self {
        BackupOrchestrator { store, cache }
    }

    // ── Export ─────────────────────────────────────────────────────────

    /// Emit the versioned backup document. Sections follow the request
    /// flags; channels are exported with their credentials.
    pub fn export(
        &self,
        auth: &dyn AuthContext,
        request: &BackupRequest,
    ) -> GatewayResult<BackupDocument> {
        if !auth.is_owner() {
            return Err(GatewayError::Forbidden("backup requires owner".into()));
        }

        let channels = if request.include_channels {
            Some(self.store.list_channels()?)
        } else {
            None
        };
        let models = if request.include_models {
            Some(self.store.list_models()?)
        } else {
            None
        };
        let channel_model_prices = if request.include_prices {
            Some(
                self.store
                    .list_prices_with_channel_names()?
                    .into_iter()
                    .map(|(channel_name, p)| BackupChannelPrice {
                        channel_name,
                        model_id: p.model_id,
                        price: p.price,
                        reference_id: p.reference_id,
                    })
                    .collect(),
            )
        } else {
            None
        };
        let api_keys = if request.include_api_keys {
            Some(
                self.store
                    .list_api_keys_with_project_names()?
                    .into_iter()
                    .map(|(k, project_name)| BackupApiKey {
                        key: k.key,
                        name: k.name,
                        project_name,
                    })
                    .collect(),
            )
        } else {
            None
        };

        Ok(BackupDocument {
            version: BACKUP_VERSION.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            channels,
            models,
            channel_model_prices,
            api_keys,
        })
    }

    // ── Restore ────────────────────────────────────────────────────────

    /// Restore a backup document inside one transaction. Any failure rolls
    /// everything back; on success a cache reload is scheduled.
    pub fn restore(
        &self,
        auth: &dyn AuthContext,
        doc: &BackupDocument,
        options: &RestoreOptions,
    ) -> GatewayResult<RestoreSummary> {
        if !auth.is_owner() {
            return Err(GatewayError::Forbidden("restore requires owner".into()));
        }
        if !BACKUP_VERSIONS_ACCEPTED.contains(&doc.version.as_str()) {
            return Err(GatewayError::validation(format!(
                "unsupported backup version '{}'",
                doc.version
            )));
        }

        let mut summary = RestoreSummary::default();
        {
            let mut conn = self.store.conn();
            let tx = conn.transaction()?;

            if let Some(channels) = &doc.channels {
                restore_channels(&tx, channels, options.channels, &mut summary)?;
            }
            if let Some(models) = &doc.models {
                restore_models(&tx, models, options.models, &mut summary)?;
            }
            if let Some(prices) = &doc.channel_model_prices {
                restore_prices(&tx, prices, options.prices, &mut summary)?;
            }
            if let Some(api_keys) = &doc.api_keys {
                restore_api_keys(&tx, api_keys, options.api_keys, &mut summary)?;
            }

            tx.commit()?;
        }

        info!(
            "[backup] Restore complete: {} channel(s), {} model(s), {} price(s), {} key(s), {} skipped",
            summary.channels, summary.models, summary.prices, summary.api_keys, summary.skipped
        );
        self.cache.schedule_reload();
        Ok(summary)
    }
}

// ── Per-section restore ────────────────────────────────────────────────────

fn restore_channels(
    tx: &Transaction<'_>,
    channels: &[Channel],
    strategy: RestoreStrategy,
    summary: &mut RestoreSummary,
) -> GatewayResult<()> {
    for ch in channels {
        ch.credentials.validate_for(ch.channel_type)?;
        let mut settings = ch.settings.clone();
        settings.override_parameters = normalize_override_parameters(&settings.override_parameters);

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM channels WHERE name = ?1 AND deleted_at IS NULL",
                params![ch.name],
                |row| row.get(0),
            )
            .optional()?;

        match (existing, strategy) {
            (Some(_), RestoreStrategy::Skip) => {
                summary.skipped += 1;
            }
            (Some(_), RestoreStrategy::Error) => {
                return Err(GatewayError::conflict(format!(
                    "channel '{}' already exists",
                    ch.name
                )));
            }
            (Some(id), RestoreStrategy::Overwrite) => {
                tx.execute(
                    "UPDATE channels SET channel_type = ?1, base_url = ?2, credentials = ?3, \
                     status = ?4, weight = ?5, supported_models = ?6, auto_sync = ?7, \
                     default_test_model = ?8, tags = ?9, settings = ?10, error_message = NULL, \
                     updated_at = strftime('%Y-%m-%d %H:%M:%f','now') WHERE id = ?11",
                    params![
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
                        id,
                    ],
                )?;
                summary.channels += 1;
            }
            (None, _) => {
                tx.execute(
                    "INSERT INTO channels (name, channel_type, base_url, credentials, status, \
                     weight, supported_models, auto_sync, default_test_model, tags, settings) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
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
                summary.channels += 1;
            }
        }
    }
    Ok(())
}

fn restore_models(
    tx: &Transaction<'_>,
    models: &[Model],
    strategy: RestoreStrategy,
    summary: &mut RestoreSummary,
) -> GatewayResult<()> {
    for m in models {
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM models WHERE developer = ?1 AND model_id = ?2",
                params![m.developer, m.model_id],
                |row| row.get(0),
            )
            .optional()?;

        match (existing, strategy) {
            (Some(_), RestoreStrategy::Skip) => summary.skipped += 1,
            (Some(_), RestoreStrategy::Error) => {
                return Err(GatewayError::conflict(format!(
                    "model {}/{} already exists",
                    m.developer, m.model_id
                )));
            }
            (Some(id), RestoreStrategy::Overwrite) => {
                tx.execute(
                    "UPDATE models SET display_name = ?1, \
                     updated_at = strftime('%Y-%m-%d %H:%M:%f','now') WHERE id = ?2",
                    params![m.display_name, id],
                )?;
                summary.models += 1;
            }
            (None, _) => {
                tx.execute(
                    "INSERT INTO models (developer, model_id, display_name) VALUES (?1, ?2, ?3)",
                    params![m.developer, m.model_id, m.display_name],
                )?;
                summary.models += 1;
            }
        }
    }
    Ok(())
}

fn restore_prices(
    tx: &Transaction<'_>,
    prices: &[BackupChannelPrice],
    strategy: RestoreStrategy,
    summary: &mut RestoreSummary,
) -> GatewayResult<()> {
    for p in prices {
        // Price rows for channels absent from this deployment are skipped,
        // never fatal.
        let channel_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM channels WHERE name = ?1 AND deleted_at IS NULL",
                params![p.channel_name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(channel_id) = channel_id else {
            warn!(
                "[backup] price for unknown channel '{}' / model '{}' — skipping",
                p.channel_name, p.model_id
            );
            summary.skipped += 1;
            continue;
        };

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM channel_model_prices WHERE channel_id = ?1 AND model_id = ?2",
                params![channel_id, p.model_id],
                |row| row.get(0),
            )
            .optional()?;

        match (existing, strategy) {
            (Some(_), RestoreStrategy::Skip) => summary.skipped += 1,
            (Some(_), RestoreStrategy::Error) => {
                return Err(GatewayError::conflict(format!(
                    "price for '{}' / '{}' already exists",
                    p.channel_name, p.model_id
                )));
            }
            (Some(id), RestoreStrategy::Overwrite) => {
                tx.execute(
                    "UPDATE channel_model_prices SET input_price = ?1, output_price = ?2 \
                     WHERE id = ?3",
                    params![p.price.input, p.price.output, id],
                )?;
                summary.prices += 1;
            }
            (None, _) => {
                tx.execute(
                    "INSERT INTO channel_model_prices \
                     (channel_id, model_id, input_price, output_price, reference_id) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![channel_id, p.model_id, p.price.input, p.price.output, p.reference_id],
                )?;
                summary.prices += 1;
            }
        }
    }
    Ok(())
}

fn restore_api_keys(
    tx: &Transaction<'_>,
    api_keys: &[BackupApiKey],
    strategy: RestoreStrategy,
    summary: &mut RestoreSummary,
) -> GatewayResult<()> {
    for k in api_keys {
        let project_name = if k.project_name.is_empty() {
            DEFAULT_PROJECT_NAME
        } else {
            k.project_name.as_str()
        };
        let project_id: Option<i64> = tx
            .query_row(
                "SELECT id FROM projects WHERE name = ?1",
                params![project_name],
                |row| row.get(0),
            )
            .optional()?;
        let Some(project_id) = project_id else {
            warn!(
                "[backup] api key …{} references unknown project '{}' — skipping",
                &k.key[k.key.len().saturating_sub(4)..],
                project_name
            );
            summary.skipped += 1;
            continue;
        };

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM api_keys WHERE key = ?1",
                params![k.key],
                |row| row.get(0),
            )
            .optional()?;

        match (existing, strategy) {
            (Some(_), RestoreStrategy::Skip) => summary.skipped += 1,
            (Some(_), RestoreStrategy::Error) => {
                return Err(GatewayError::conflict("api key already exists".to_string()));
            }
            (Some(id), RestoreStrategy::Overwrite) => {
                tx.execute(
                    "UPDATE api_keys SET name = ?1, project_id = ?2 WHERE id = ?3",
                    params![k.name, project_id, id],
                )?;
                summary.api_keys += 1;
            }
            (None, _) => {
                tx.execute(
                    "INSERT INTO api_keys (key, name, project_id) VALUES (?1, ?2, ?3)",
                    params![k.key, k.name, project_id],
                )?;
                summary.api_keys += 1;
            }
        }
    }
    Ok(())
}

// ── Tests ──────────────────────────────────────────────────────────────────
