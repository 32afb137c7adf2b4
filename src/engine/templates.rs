// Modelgate Engine — Template Applier
// Applies an override template to a batch of channels of the matching
// type: re-merges each channel's headers and parameters against the
// template and persists all of them in one transaction. Commit triggers an
// async cache reload so selection sees the new settings within seconds.

use std::sync::Arc;

use log::info;

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::engine::cache::ChannelCache;
use crate::engine::overrides::{merge_override_headers, merge_override_parameters};
use crate::engine::store::GatewayStore;
use crate::engine::types::ChannelSettings;

pub struct TemplateApplier {
    store: Arc<GatewayStore>,
    cache: Arc<ChannelCache>,
}

impl TemplateApplier {
    pub fn new(store: Arc<GatewayStore>, cache: Arc<ChannelCache>) -> Self {
        TemplateApplier { store, cache }
    }

    /// Apply `template_id` to every channel in `channel_ids`. All targets
    /// must exist and carry the template's channel type; any per-channel
    /// error rolls the whole batch back. Returns the number of channels
    /// updated.
    pub fn apply_template(&self, template_id: i64, channel_ids: &[i64]) -> GatewayResult<usize> {
        let template = self.store.get_template(template_id)?;

        let mut channels = Vec::with_capacity(channel_ids.len());
        for id in channel_ids {
            channels.push(self.store.get_channel(*id)?);
        }

        for ch in &channels {
            if ch.channel_type != template.channel_type {
                return Err(GatewayError::validation(format!(
                    "channel '{}' has type '{}' which does not match template type '{}'",
                    ch.name,
                    ch.channel_type.as_str(),
                    template.channel_type.as_str()
                )));
            }
        }

        let mut updates: Vec<(i64, ChannelSettings)> = Vec::with_capacity(channels.len());
        for ch in &channels {
            // Work on a copy — the loaded channel is never mutated.
            let mut settings = ch.settings.clone();
            settings.override_headers =
                merge_override_headers(&ch.settings.override_headers, &template.override_headers);
            settings.override_parameters = merge_override_parameters(
                &ch.settings.override_parameters,
                &template.override_parameters,
            )?;
            updates.push((ch.id, settings));
        }

        self.store.update_channels_settings_tx(&updates)?;
        info!(
            "[templates] Applied template '{}' to {} channel(s)",
            template.name,
            updates.len()
        );
        self.cache.schedule_reload();
        Ok(updates.len())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
