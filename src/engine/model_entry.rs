// Modelgate Engine — Model-Entry Resolver
// Builds the per-channel `request_model → actual_model` table that unifies
// the four naming schemes: direct listing, extra prefix, auto-trimmed
// prefixes, and explicit mappings. Built once per live channel and cached;
// a new table appears on cache reload.

use std::collections::HashMap;

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::engine::types::{Channel, ChannelSettings};

// ── Types ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelEntrySource {
    Direct,
    Prefix,
    AutoTrim,
    Mapping,
}

#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub actual_model: String,
    pub source: ModelEntrySource,
}

pub type ModelEntryTable = HashMap<String, ModelEntry>;

// ── Construction ───────────────────────────────────────────────────────────

fn insert_first_wins(
    table: &mut ModelEntryTable,
    request_model: String,
    actual_model: String,
    source: ModelEntrySource,
) {
    table.entry(request_model).or_insert(ModelEntry {
        actual_model,
        source,
    });
}

/// Build the lookup table for one channel. Precedence is construction
/// order — the first writer wins per request-model key:
///   1. every supported model maps to itself (direct)
///   2. extra prefix adds "<prefix>/<model>" aliases
///   3. auto-trim prefixes add "<model-without-prefix>" aliases
///   4. mappings add "<from> → <to>" for targets that are supported;
///      hide-mapped also removes the mapped target itself
///   5. hide-original removes every direct entry
pub fn build_model_entries(supported_models: &[String], settings: &ChannelSettings) -> ModelEntryTable {
    let mut table = ModelEntryTable::new();

    for m in supported_models {
        insert_first_wins(&mut table, m.clone(), m.clone(), ModelEntrySource::Direct);
    }

    if let Some(prefix) = settings
        .extra_model_prefix
        .as_deref()
        .filter(|p| !p.is_empty())
    {
        for m in supported_models {
            insert_first_wins(
                &mut table,
                format!("{}/{}", prefix, m),
                m.clone(),
                ModelEntrySource::Prefix,
            );
        }
    }

    for prefix in settings
        .auto_trimmed_model_prefixes
        .iter()
        .filter(|p| !p.is_empty())
    {
        let needle = format!("{}/", prefix);
        for m in supported_models {
            if let Some(trimmed) = m.strip_prefix(&needle) {
                if !trimmed.is_empty() {
                    insert_first_wins(
                        &mut table,
                        trimmed.to_string(),
                        m.clone(),
                        ModelEntrySource::AutoTrim,
                    );
                }
            }
        }
    }

    for mapping in &settings.model_mappings {
        if supported_models.contains(&mapping.to) {
            insert_first_wins(
                &mut table,
                mapping.from.clone(),
                mapping.to.clone(),
                ModelEntrySource::Mapping,
            );
            if settings.hide_mapped_models {
                table.remove(&mapping.to);
            }
        }
    }

    if settings.hide_original_models {
        table.retain(|_, entry| entry.source != ModelEntrySource::Direct);
    }

    table
}

pub fn build_for_channel(channel: &Channel) -> ModelEntryTable {
    build_model_entries(&channel.supported_models, &channel.settings)
}

// ── Lookup ─────────────────────────────────────────────────────────────────

pub fn is_model_supported(table: &ModelEntryTable, request_model: &str) -> bool {
    table.contains_key(request_model)
}

/// Resolve the request model to the name the upstream actually serves.
pub fn choose_model<'a>(table: &'a ModelEntryTable, request_model: &str) -> GatewayResult<&'a str> {
    table
        .get(request_model)
        .map(|e| e.actual_model.as_str())
        .ok_or_else(|| GatewayError::unsupported(format!("model '{}' is not supported", request_model)))
}

// ── Tests ──────────────────────────────────────────────────────────────────
