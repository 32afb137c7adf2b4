// Modelgate Engine — Google Transformer
// generateContent wire format. Plain API keys travel as a query parameter;
// GCP service accounts use the short-lived bearer token minted by the
// token-refresh callback.

use serde_json::json;
use zeroize::Zeroizing;

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::traits::{OutboundTransformer, PreparedRequest};
use crate::engine::types::{ChannelType, Credentials};

enum AuthStyle {
    QueryKey,
    Bearer,
}

pub struct GoogleTransformer {
    base_url: String,
    secret: Zeroizing<String>,
    auth: AuthStyle,
}

impl GoogleTransformer {
    pub fn new(base_url: &str, credentials: &Credentials) -> GatewayResult<Self> {
        let (secret, auth) = match credentials {
            Credentials::ApiKey(k) => (k.clone(), AuthStyle::QueryKey),
            Credentials::Gcp(sa) => (
                sa.access_token.clone().ok_or_else(|| {
                    GatewayError::validation(
                        "GCP service account has no minted access token",
                    )
                })?,
                AuthStyle::Bearer,
            ),
            other => {
                return Err(GatewayError::validation(format!(
                    "credentials shape '{}' is not usable by a Google channel",
                    other.shape_name()
                )))
            }
        };
        let base = if base_url.is_empty() {
            ChannelType::Google.default_base_url().to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Ok(GoogleTransformer {
            base_url: base,
            secret: Zeroizing::new(secret),
            auth,
        })
    }
}

impl OutboundTransformer for GoogleTransformer {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Google
    }

    fn build_probe(&self, model: &str) -> GatewayResult<PreparedRequest> {
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.base_url,
            urlencoding::encode(model)
        );
        let (url, headers) = match self.auth {
            AuthStyle::QueryKey => (
                format!("{}?key={}", endpoint, urlencoding::encode(&self.secret)),
                vec![],
            ),
            AuthStyle::Bearer => (
                endpoint,
                vec![(
                    "Authorization".to_string(),
                    format!("Bearer {}", self.secret.as_str()),
                )],
            ),
        };
        Ok(PreparedRequest {
            url,
            headers,
            body: json!({
                "contents": [{ "parts": [{ "text": "ping" }] }],
                "generationConfig": { "maxOutputTokens": 1 },
            }),
        })
    }
}
