// Modelgate Engine — OpenAI-Compatible Transformer
// One implementation covers every provider speaking the OpenAI chat wire
// format: OpenAI itself, Ollama, OpenRouter, DeepSeek, Grok, Mistral,
// Moonshot, and custom endpoints.

use serde_json::json;
use zeroize::Zeroizing;

use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::traits::{OutboundTransformer, PreparedRequest};
use crate::engine::types::{ChannelType, Credentials};

pub struct OpenAiTransformer {
    kind: ChannelType,
    base_url: String,
    /// API key wrapped in Zeroizing<> — zeroed from RAM on drop.
    api_key: Zeroizing<String>,
}

impl OpenAiTransformer {
    pub fn new(
        kind: ChannelType,
        base_url: &str,
        credentials: &Credentials,
    ) -> GatewayResult<Self> {
        let key = match credentials {
            Credentials::ApiKey(k) => k.clone(),
            Credentials::ApiKeys(keys) => keys
                .first()
                .cloned()
                .ok_or_else(|| GatewayError::validation("credentials key list is empty"))?,
            Credentials::Oauth(o) if kind == ChannelType::Custom => o.access_token.clone(),
            other => {
                return Err(GatewayError::validation(format!(
                    "credentials shape '{}' is not usable by an OpenAI-compatible channel",
                    other.shape_name()
                )))
            }
        };
        let base = if base_url.is_empty() {
            kind.default_base_url().to_string()
        } else {
            base_url.trim_end_matches('/').to_string()
        };
        Ok(OpenAiTransformer {
            kind,
            base_url: base,
            api_key: Zeroizing::new(key),
        })
    }
}

impl OutboundTransformer for OpenAiTransformer {
    fn channel_type(&self) -> ChannelType {
        self.kind
    }

    fn build_probe(&self, model: &str) -> GatewayResult<PreparedRequest> {
        Ok(PreparedRequest {
            url: format!("{}/chat/completions", self.base_url),
            headers: vec![(
                "Authorization".to_string(),
                format!("Bearer {}", self.api_key.as_str()),
            )],
            body: json!({
                "model": model,
                "messages": [{ "role": "user", "content": "ping" }],
                "max_tokens": 1,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_carries_bearer_auth_and_model() {
        let t = OpenAiTransformer::new(
            ChannelType::OpenAi,
            "",
            &Credentials::ApiKey("sk-test".into()),
        )
        .unwrap();
        let req = t.build_probe("gpt-4o-mini").unwrap();
        assert_eq!(req.url, "https://api.openai.com/v1/chat/completions");
        assert_eq!(
            req.headers,
            vec![("Authorization".to_string(), "Bearer sk-test".to_string())]
        );
        assert_eq!(req.body["model"], "gpt-4o-mini");
    }

    #[test]
    fn key_list_uses_head_key() {
        let t = OpenAiTransformer::new(
            ChannelType::DeepSeek,
            "https://api.deepseek.com/v1/",
            &Credentials::ApiKeys(vec!["k1".into(), "k2".into()]),
        )
        .unwrap();
        let req = t.build_probe("deepseek-chat").unwrap();
        assert_eq!(req.url, "https://api.deepseek.com/v1/chat/completions");
        assert_eq!(req.headers[0].1, "Bearer k1");
    }

    #[test]
    fn empty_key_list_is_rejected() {
        assert!(
            OpenAiTransformer::new(ChannelType::OpenAi, "", &Credentials::ApiKeys(vec![]))
                .is_err()
        );
    }
}
