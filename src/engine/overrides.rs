// Modelgate Engine — Override Merge
// Pure functions merging per-channel header lists and parameter JSON
// objects with template overrides. Used by the template applier and by the
// admin write path (validation + normalization).

use serde_json::{Map, Value};

use crate::atoms::constants::HEADER_CLEAR_DIRECTIVE;
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::engine::types::HeaderOverride;

// ── Header merge ───────────────────────────────────────────────────────────

/// Merge template headers into an existing list.
///
/// Existing entries keep their order. A template entry replaces the first
/// existing entry whose key matches case-insensitively, in place; otherwise
/// it is appended. A template entry whose value is the clear directive
/// deletes the matching existing entry and is itself dropped.
pub fn merge_override_headers(
    existing: &[HeaderOverride],
    template: &[HeaderOverride],
) -> Vec<HeaderOverride> {
    let mut merged: Vec<HeaderOverride> = existing.to_vec();

    for entry in template {
        let pos = merged
            .iter()
            .position(|h| h.key.eq_ignore_ascii_case(&entry.key));

        if entry.value == HEADER_CLEAR_DIRECTIVE {
            if let Some(i) = pos {
                merged.remove(i);
            }
            continue;
        }

        match pos {
            Some(i) => merged[i] = entry.clone(),
            None => merged.push(entry.clone()),
        }
    }

    merged
}

/// Every key non-blank; no two keys equal case-insensitively.
pub fn validate_override_headers(headers: &[HeaderOverride]) -> GatewayResult<()> {
    for (i, h) in headers.iter().enumerate() {
        if h.key.trim().is_empty() {
            return Err(GatewayError::validation("header key must not be blank"));
        }
        if headers[..i]
            .iter()
            .any(|prev| prev.key.eq_ignore_ascii_case(&h.key))
        {
            return Err(GatewayError::conflict(format!(
                "duplicate header key '{}'",
                h.key
            )));
        }
    }
    Ok(())
}

// ── Parameter merge ────────────────────────────────────────────────────────

fn parse_object(input: &str, which: &str) -> GatewayResult<Map<String, Value>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(GatewayError::validation(format!(
            "{} override parameters must be a JSON object",
            which
        ))),
        Err(e) => Err(GatewayError::validation(format!(
            "{} override parameters are not valid JSON: {}",
            which, e
        ))),
    }
}

fn deep_merge(existing: &mut Map<String, Value>, template: Map<String, Value>) {
    for (key, template_value) in template {
        match (existing.get_mut(&key), template_value) {
            // Both objects: recurse.
            (Some(Value::Object(existing_obj)), Value::Object(template_obj)) => {
                deep_merge(existing_obj, template_obj);
            }
            // Everything else: template wins wholesale (arrays included).
            (_, template_value) => {
                existing.insert(key, template_value);
            }
        }
    }
}

/// Deep-merge `template_json` over `existing_json`. Both must parse to JSON
/// objects (empty string is `{}`). Arrays are never merged element-wise.
pub fn merge_override_parameters(
    existing_json: &str,
    template_json: &str,
) -> GatewayResult<String> {
    let mut existing = parse_object(existing_json, "existing")?;
    let template = parse_object(template_json, "template")?;
    deep_merge(&mut existing, template);
    Ok(Value::Object(existing).to_string())
}

/// Must parse to an object and must NOT contain a top-level `stream` key —
/// streaming is negotiated by the request itself, never rewritten by
/// template.
pub fn validate_override_parameters(input: &str) -> GatewayResult<()> {
    let obj = parse_object(input, "channel")?;
    if obj.contains_key("stream") {
        return Err(GatewayError::validation(
            "override parameters must not set 'stream'",
        ));
    }
    Ok(())
}

/// Rewrite empty/whitespace parameter text to the literal `{}` at write
/// time so downstream parsers never see "".
pub fn normalize_override_parameters(input: &str) -> String {
    if input.trim().is_empty() {
        "{}".to_string()
    } else {
        input.to_string()
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
