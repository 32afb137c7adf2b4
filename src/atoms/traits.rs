// ── Modelgate Atoms: Collaborator Traits ───────────────────────────────────
// The seams between the routing core and its external collaborators.
// The core consumes these; the execution layer and the admin surface
// provide (or reuse) the implementations.

use async_trait::async_trait;

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::types::{AutoDisablePolicy, ChannelType};

// ── Outbound transformer ───────────────────────────────────────────────────

/// A provider-correct HTTP request, ready for the execution layer.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

/// Opaque per-channel handle that knows one provider's wire format and auth
/// style. Constructed once per live channel; the execution layer drives it.
#[async_trait]
pub trait OutboundTransformer: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Build a minimal completion request for `model` — enough to verify
    /// that the endpoint, credentials, and model name all line up.
    fn build_probe(&self, model: &str) -> GatewayResult<PreparedRequest>;

    /// Send the probe and fail on a non-2xx response.
    async fn probe(&self, client: &reqwest::Client, model: &str) -> GatewayResult<()> {
        let req = self.build_probe(model)?;
        let mut builder = client.post(&req.url).json(&req.body);
        for (k, v) in &req.headers {
            builder = builder.header(k.as_str(), v.as_str());
        }
        let resp = builder.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(GatewayError::upstream(
            status.as_u16(),
            body.chars().take(200).collect::<String>(),
        ))
    }
}

// ── System settings ────────────────────────────────────────────────────────

/// Read-only access to the retry / auto-disable policy.
pub trait SystemSettingsSource: Send + Sync {
    fn auto_disable_policy(&self) -> AutoDisablePolicy;
}

/// A fixed policy is itself a settings source — handy for tests and for
/// deployments without a dynamic settings store.
impl SystemSettingsSource for AutoDisablePolicy {
    fn auto_disable_policy(&self) -> AutoDisablePolicy {
        self.clone()
    }
}

// ── Authorization ──────────────────────────────────────────────────────────

/// The current caller, as established by the authentication layer.
/// Owner is required for backup/restore; the rest of the core assumes
/// privilege has already been validated.
pub trait AuthContext {
    fn user_id(&self) -> i64;
    fn is_owner(&self) -> bool;
}
