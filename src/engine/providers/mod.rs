// Modelgate Engine — Outbound Transformer Registry
// AnyTransformer wraps Box<dyn OutboundTransformer> so adding a provider
// with a unique wire format never requires touching the call sites — just
// implement the trait and add a factory arm.

pub mod anthropic;
pub mod google;
pub mod openai;

pub use anthropic::AnthropicTransformer;
pub use google::GoogleTransformer;
pub use openai::OpenAiTransformer;

use crate::atoms::error::GatewayResult;
use crate::atoms::traits::{OutboundTransformer, PreparedRequest};
use crate::engine::types::{ChannelType, Credentials};

// ── Transformer factory ────────────────────────────────────────────────────

/// Type-erased outbound transformer. The execution layer holds
/// `AnyTransformer` and drives it without knowing which wire format is in
/// use.
pub struct AnyTransformer(Box<dyn OutboundTransformer>);

impl AnyTransformer {
    /// Construct the right concrete transformer for a channel.
    ///
    /// To add a NEW OpenAI-compatible provider: add the ChannelType variant
    /// and its default_base_url() — the `_` arm here handles the rest. A
    /// provider with a UNIQUE wire format gets its own module + match arm.
    pub fn from_channel(
        channel_type: ChannelType,
        base_url: &str,
        credentials: &Credentials,
    ) -> GatewayResult<Self> {
        let transformer: Box<dyn OutboundTransformer> = match channel_type {
            ChannelType::Anthropic => {
                Box::new(AnthropicTransformer::new(base_url, credentials)?)
            }
            ChannelType::Google => Box::new(GoogleTransformer::new(base_url, credentials)?),
            // All OpenAI-compatible variants:
            // OpenAi, Ollama, OpenRouter, DeepSeek, Grok, Mistral, Moonshot, Custom
            _ => Box::new(OpenAiTransformer::new(channel_type, base_url, credentials)?),
        };
        Ok(AnyTransformer(transformer))
    }

    pub fn channel_type(&self) -> ChannelType {
        self.0.channel_type()
    }

    pub fn build_probe(&self, model: &str) -> GatewayResult<PreparedRequest> {
        self.0.build_probe(model)
    }

    /// Send a minimal completion against `model` and fail on non-2xx.
    /// Used by channel testing with the channel's default test model.
    pub async fn probe(&self, client: &reqwest::Client, model: &str) -> GatewayResult<()> {
        self.0.probe(client, model).await
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────
