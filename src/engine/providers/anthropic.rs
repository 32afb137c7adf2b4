// Modelgate Engine — Anthropic Transformer
// Messages-API wire format. API-key channels authenticate with x-api-key;
// OAuth bundles use a bearer token instead.

use serde_json::json;
use zeroize::Zeroizing;

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::traits::{OutboundTransformer, PreparedRequest};
use crate::engine::types::{ChannelType, Credentials};

const ANTHROPIC_VERSION: &str = "2023-06-01";

enum AuthStyle {
    ApiKey,
    Bearer,
}

pub struct AnthropicTransformer {
    base_url: String,
    secret: Zeroizing<String>,
    auth: AuthStyle,
}

impl AnthropicTransformer {
    pub fn new(base_url: &str, credentials: &Credentials) -> GatewayResult<Self> {
        let (secret, auth) = match credentials {
            Credentials::ApiKey(k) => (k.clone(), AuthStyle::ApiKey),
            Credentials::ApiKeys(keys) => (
                keys.first()
                    .cloned()
                    .ok_or_else(|| GatewayError::validation("credentials key list is empty"))?,
                AuthStyle::ApiKey,
            ),
            Credentials::Oauth(o) => (o.access_token.clone(), AuthStyle::Bearer),
            other => {
                return Err(GatewayError::validation(format!(
                    "credentials shape '{}' is not usable by an Anthropic channel",
                    other.shape_name()
                )))
            }
        };
        let base = if base_url.is_empty() {
            ChannelType::Anthropic.default_base_url().to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Ok(AnthropicTransformer {
            base_url: base,
            secret: Zeroizing::new(secret),
            auth,
        })
    }
}

impl OutboundTransformer for AnthropicTransformer {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Anthropic
    }

    fn build_probe(&self, model: &str) -> GatewayResult<PreparedRequest> {
        let mut headers = vec![(
            "anthropic-version".to_string(),
            ANTHROPIC_VERSION.to_string(),
        )];
        match self.auth {
            AuthStyle::ApiKey => {
                headers.push(("x-api-key".to_string(), self.secret.to_string()));
            }
            AuthStyle::Bearer => {
                headers.push((
                    "Authorization".to_string(),
                    format!("Bearer {}", self.secret.as_str()),
                ));
            }
        }
        Ok(PreparedRequest {
            url: format!("{}/v1/messages", self.base_url),
            headers,
            body: json!({
                "model": model,
                "max_tokens": 1,
                "messages": [{ "role": "user", "content": "ping" }],
            }),
        })
    }
}
