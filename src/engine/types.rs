// Modelgate Engine — Core types
// Struct/enum definitions live in crate::atoms::types; all impl blocks and
// free helper functions live here. Engine code uses
// `use crate::engine::types::*` and sees both.

pub use crate::atoms::types::*;

use crate::atoms::error::{GatewayError, GatewayResult};

// ── Channel type ───────────────────────────────────────────────────────────

impl ChannelType {
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ChannelType::OpenAi => "https://api.openai.com/v1",
            ChannelType::Anthropic => "https://api.anthropic.com",
            ChannelType::Google => "https://generativelanguage.googleapis.com/v1beta",
            ChannelType::Ollama => "http://localhost:11434",
            ChannelType::OpenRouter => "https://openrouter.ai/api/v1",
            ChannelType::DeepSeek => "https://api.deepseek.com/v1",
            ChannelType::Grok => "https://api.x.ai/v1",
            ChannelType::Mistral => "https://api.mistral.ai/v1",
            ChannelType::Moonshot => "https://api.moonshot.cn/v1",
            ChannelType::Custom => "",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::OpenAi => "openai",
            ChannelType::Anthropic => "anthropic",
            ChannelType::Google => "google",
            ChannelType::Ollama => "ollama",
            ChannelType::OpenRouter => "openrouter",
            ChannelType::DeepSeek => "deepseek",
            ChannelType::Grok => "grok",
            ChannelType::Mistral => "mistral",
            ChannelType::Moonshot => "moonshot",
            ChannelType::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> GatewayResult<ChannelType> {
        match s {
            "openai" => Ok(ChannelType::OpenAi),
            "anthropic" => Ok(ChannelType::Anthropic),
            "google" => Ok(ChannelType::Google),
            "ollama" => Ok(ChannelType::Ollama),
            "openrouter" => Ok(ChannelType::OpenRouter),
            "deepseek" => Ok(ChannelType::DeepSeek),
            "grok" => Ok(ChannelType::Grok),
            "mistral" => Ok(ChannelType::Mistral),
            "moonshot" => Ok(ChannelType::Moonshot),
            "custom" => Ok(ChannelType::Custom),
            other => Err(GatewayError::unsupported(format!(
                "unknown channel type '{}'",
                other
            ))),
        }
    }
}

// ── Channel status ─────────────────────────────────────────────────────────

impl ChannelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Enabled => "enabled",
            ChannelStatus::Disabled => "disabled",
            ChannelStatus::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> GatewayResult<ChannelStatus> {
        match s {
            "enabled" => Ok(ChannelStatus::Enabled),
            "disabled" => Ok(ChannelStatus::Disabled),
            "archived" => Ok(ChannelStatus::Archived),
            other => Err(GatewayError::validation(format!(
                "unknown channel status '{}'",
                other
            ))),
        }
    }
}

// ── Credentials ────────────────────────────────────────────────────────────

impl Credentials {
    pub fn shape_name(&self) -> &'static str {
        match self {
            Credentials::ApiKey(_) => "api_key",
            Credentials::ApiKeys(_) => "api_keys",
            Credentials::Oauth(_) => "oauth",
            Credentials::Gcp(_) => "gcp",
            Credentials::Aws(_) => "aws",
        }
    }

    /// The key the next outbound request will authenticate with, if this
    /// shape carries one.
    pub fn active_key(&self) -> Option<&str> {
        match self {
            Credentials::ApiKey(k) => Some(k.as_str()),
            Credentials::ApiKeys(keys) => keys.first().map(|k| k.as_str()),
            Credentials::Oauth(o) => Some(o.access_token.as_str()),
            Credentials::Gcp(g) => g.access_token.as_deref(),
            Credentials::Aws(_) => None,
        }
    }

    /// Drop a failed key from a rotating list. Returns true when at least
    /// one key remains usable; a single-key shape losing its key means the
    /// channel must be disabled instead.
    pub fn rotate_away(&mut self, failed_key: &str) -> bool {
        match self {
            Credentials::ApiKeys(keys) => {
                keys.retain(|k| k != failed_key);
                !keys.is_empty()
            }
            _ => false,
        }
    }

    /// Credentials shape must match the channel type (invariant from the
    /// data model). The `aws` shape round-trips through backup but no
    /// current channel type accepts it.
    pub fn validate_for(&self, channel_type: ChannelType) -> GatewayResult<()> {
        let ok = match (channel_type, self) {
            (ChannelType::Anthropic, Credentials::ApiKey(_))
            | (ChannelType::Anthropic, Credentials::ApiKeys(_))
            | (ChannelType::Anthropic, Credentials::Oauth(_)) => true,
            (ChannelType::Google, Credentials::ApiKey(_))
            | (ChannelType::Google, Credentials::Gcp(_)) => true,
            (ChannelType::Custom, Credentials::ApiKey(_))
            | (ChannelType::Custom, Credentials::ApiKeys(_))
            | (ChannelType::Custom, Credentials::Oauth(_)) => true,
            // All remaining OpenAI-compatible types.
            (_, Credentials::ApiKey(_)) | (_, Credentials::ApiKeys(_)) => {
                !matches!(channel_type, ChannelType::Anthropic | ChannelType::Google)
            }
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(GatewayError::validation(format!(
                "credentials shape '{}' does not match channel type '{}'",
                self.shape_name(),
                channel_type.as_str()
            )))
        }
    }
}

// ── Channel ────────────────────────────────────────────────────────────────

impl Channel {
    /// Effective base URL: explicit override or the type default.
    pub fn effective_base_url(&self) -> String {
        match &self.base_url {
            Some(url) if !url.is_empty() => url.trim_end_matches('/').to_string(),
            _ => self.channel_type.default_base_url().to_string(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.status == ChannelStatus::Enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_roundtrip() {
        for t in [
            ChannelType::OpenAi,
            ChannelType::Anthropic,
            ChannelType::Google,
            ChannelType::Ollama,
            ChannelType::OpenRouter,
            ChannelType::DeepSeek,
            ChannelType::Grok,
            ChannelType::Mistral,
            ChannelType::Moonshot,
            ChannelType::Custom,
        ] {
            assert_eq!(ChannelType::parse(t.as_str()).unwrap(), t);
        }
        assert!(ChannelType::parse("bedrock").is_err());
    }

    #[test]
    fn credentials_shape_validation() {
        let key = Credentials::ApiKey("sk-test".into());
        assert!(key.validate_for(ChannelType::OpenAi).is_ok());
        assert!(key.validate_for(ChannelType::Anthropic).is_ok());

        let gcp = Credentials::Gcp(GcpServiceAccount {
            project_id: "p".into(),
            client_email: "e@p.iam".into(),
            private_key: "pem".into(),
            access_token: None,
        });
        assert!(gcp.validate_for(ChannelType::Google).is_ok());
        assert!(gcp.validate_for(ChannelType::OpenAi).is_err());

        let aws = Credentials::Aws(AwsKeyPair {
            access_key_id: "AKIA".into(),
            secret_access_key: "secret".into(),
            region: "us-east-1".into(),
        });
        assert!(aws.validate_for(ChannelType::Custom).is_err());
    }

    #[test]
    fn key_rotation_drops_failed_key() {
        let mut creds = Credentials::ApiKeys(vec!["k1".into(), "k2".into()]);
        assert_eq!(creds.active_key(), Some("k1"));
        assert!(creds.rotate_away("k1"));
        assert_eq!(creds.active_key(), Some("k2"));
        assert!(!creds.rotate_away("k2"));
        assert_eq!(creds.active_key(), None);
    }

    #[test]
    fn credentials_wire_shape() {
        let json = serde_json::to_value(Credentials::ApiKey("sk".into())).unwrap();
        assert_eq!(json, serde_json::json!({ "api_key": "sk" }));
        let json = serde_json::to_value(Credentials::ApiKeys(vec!["a".into()])).unwrap();
        assert_eq!(json, serde_json::json!({ "api_keys": ["a"] }));
    }
}
