// ── Modelgate Atoms: Pure Data Types ───────────────────────────────────────
// All plain struct/enum definitions with no logic.
// Atoms layer rule: no I/O, no side effects, no imports from engine/.
//
// These types are re-exported from engine/types.rs via
//   pub use crate::atoms::types::*;
// so engine code imports them with `use crate::engine::types::*`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::atoms::constants::*;

// ── Channel ────────────────────────────────────────────────────────────────

/// A configured binding to one upstream provider endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    /// Unique, case-sensitive.
    pub name: String,
    pub channel_type: ChannelType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    pub credentials: Credentials,
    pub status: ChannelStatus,
    /// Ordering weight — higher is tried first.
    #[serde(default)]
    pub weight: i64,
    #[serde(default)]
    pub supported_models: Vec<String>,
    #[serde(default)]
    pub auto_sync: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_test_model: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub settings: ChannelSettings,
    /// Set by the auto-disable controller; cleared on successful update.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    OpenAi,
    Anthropic,
    Google,
    Ollama,
    OpenRouter,
    DeepSeek,
    Grok,
    Mistral,
    Moonshot,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    Enabled,
    Disabled,
    /// Terminal for selection purposes.
    Archived,
}

// ── Credentials ────────────────────────────────────────────────────────────

/// Polymorphic channel credentials. The external tag doubles as the wire
/// shape in the backup document ("api_key" | "api_keys" | "oauth" | "gcp"
/// | "aws").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Credentials {
    ApiKey(String),
    /// Rotating key list — the head is the active key; keys that trip the
    /// per-key failure threshold are dropped from the list.
    ApiKeys(Vec<String>),
    Oauth(OauthBundle),
    Gcp(GcpServiceAccount),
    Aws(AwsKeyPair),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OauthBundle {
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// RFC3339 expiry; refreshed by the token-refresh callback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GcpServiceAccount {
    pub project_id: String,
    pub client_email: String,
    pub private_key: String,
    /// Short-lived bearer token minted by the token-refresh callback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AwsKeyPair {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub region: String,
}

// ── Channel settings ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Prefix that, joined with "/", exposes every supported model under an
    /// additional alias (e.g. "team" → "team/gpt-4").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_model_prefix: Option<String>,
    /// Prefixes stripped from supported models to expose trimmed aliases
    /// (e.g. "openai/gpt-4" → "gpt-4").
    #[serde(default)]
    pub auto_trimmed_model_prefixes: Vec<String>,
    #[serde(default)]
    pub model_mappings: Vec<ModelMapping>,
    #[serde(default)]
    pub hide_original_models: bool,
    #[serde(default)]
    pub hide_mapped_models: bool,
    #[serde(default)]
    pub override_headers: Vec<HeaderOverride>,
    /// JSON object text; "" is treated as "{}".
    #[serde(default)]
    pub override_parameters: String,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelMapping {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HeaderOverride {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProxyConfig {
    #[default]
    None,
    Http {
        url: String,
    },
    Socks5 {
        url: String,
    },
}

// ── Models & prices ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: i64,
    pub developer: String,
    pub model_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// Per-million-token pricing.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

/// Cached read-through pricing row; no selection logic depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelModelPrice {
    pub id: i64,
    pub channel_id: i64,
    pub model_id: String,
    pub price: ModelPrice,
    /// Stable across backup/restore cycles.
    pub reference_id: String,
}

// ── Override templates ─────────────────────────────────────────────────────

/// A named bundle of header operations and parameter overrides applied in
/// bulk to channels of a matching type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideTemplate {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub channel_type: ChannelType,
    /// JSON object text; "" is treated as "{}".
    #[serde(default)]
    pub override_parameters: String,
    #[serde(default)]
    pub override_headers: Vec<HeaderOverride>,
}

// ── API keys & projects ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: i64,
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub project_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
}

// ── Performance records ────────────────────────────────────────────────────

/// Outcome message generated at the boundary between the execution layer
/// and the core. Not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceRecord {
    pub channel_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub end_time: DateTime<Utc>,
    pub success: bool,
    #[serde(default)]
    pub canceled: bool,
    /// False while the request is still in flight; such records are ignored.
    #[serde(default = "default_true")]
    pub request_completed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_status_code: Option<u16>,
}

pub(crate) fn default_true() -> bool {
    true
}

// ── Auto-disable policy ────────────────────────────────────────────────────

/// System-configured circuit policy. Read from the system-settings source;
/// the defaults below apply at initialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoDisablePolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_per_code_window")]
    pub per_code_window_secs: i64,
    #[serde(default = "default_channel_threshold")]
    pub channel_threshold_per_code: u32,
    #[serde(default = "default_key_threshold")]
    pub key_threshold_per_code: u32,
    /// Upstream statuses that disable the channel (or key) immediately,
    /// regardless of thresholds.
    #[serde(default = "default_unrecoverable_codes")]
    pub unrecoverable_codes: Vec<u16>,
}

fn default_per_code_window() -> i64 {
    AUTO_DISABLE_WINDOW_SECS
}
fn default_channel_threshold() -> u32 {
    AUTO_DISABLE_CHANNEL_THRESHOLD
}
fn default_key_threshold() -> u32 {
    AUTO_DISABLE_KEY_THRESHOLD
}
fn default_unrecoverable_codes() -> Vec<u16> {
    AUTO_DISABLE_UNRECOVERABLE_CODES.to_vec()
}

impl Default for AutoDisablePolicy {
    fn default() -> Self {
        AutoDisablePolicy {
            enabled: true,
            per_code_window_secs: default_per_code_window(),
            channel_threshold_per_code: default_channel_threshold(),
            key_threshold_per_code: default_key_threshold(),
            unrecoverable_codes: default_unrecoverable_codes(),
        }
    }
}

// ── Inbound requests ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Completion,
    Rerank,
    Embedding,
}

/// What the selector consumes: the logical model named by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRequest {
    pub kind: RequestKind,
    pub model: String,
}

// ── Backup document ────────────────────────────────────────────────────────

/// Versioned full-state export. Section fields are omitted when the
/// corresponding request flag was off.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupDocument {
    pub version: String,
    /// RFC3339.
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channels: Option<Vec<Channel>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<Model>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_model_prices: Option<Vec<BackupChannelPrice>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_keys: Option<Vec<BackupApiKey>>,
}

/// Price row keyed by channel *name* so it survives id renumbering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupChannelPrice {
    pub channel_name: String,
    pub model_id: String,
    pub price: ModelPrice,
    pub reference_id: String,
}

/// API key with its project name denormalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupApiKey {
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub project_name: String,
}

/// Section inclusion flags for export.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BackupRequest {
    #[serde(default = "default_true")]
    pub include_channels: bool,
    #[serde(default = "default_true")]
    pub include_models: bool,
    #[serde(default = "default_true")]
    pub include_prices: bool,
    #[serde(default = "default_true")]
    pub include_api_keys: bool,
}

impl Default for BackupRequest {
    fn default() -> Self {
        BackupRequest {
            include_channels: true,
            include_models: true,
            include_prices: true,
            include_api_keys: true,
        }
    }
}

/// What to do when a restored entity already exists.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RestoreStrategy {
    #[default]
    Skip,
    Overwrite,
    Error,
}

/// Per-section conflict policy for restore.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RestoreOptions {
    #[serde(default)]
    pub channels: RestoreStrategy,
    #[serde(default)]
    pub models: RestoreStrategy,
    #[serde(default)]
    pub prices: RestoreStrategy,
    #[serde(default)]
    pub api_keys: RestoreStrategy,
}
