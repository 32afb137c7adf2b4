// Modelgate — channel routing & health core for a multi-provider LLM gateway.
//
// The core accepts inbound completion/rerank/embedding requests that name a
// logical model, chooses an enabled provider channel able to serve it,
// applies per-channel transformations (model rewriting, header/parameter
// overrides, credential injection), and records outcome signals that feed
// back into future routing via a sliding-window load balancer and a
// per-channel / per-key circuit breaker.
//
// Layering:
//   atoms/   — pure constants, error types, data types, collaborator traits
//   engine/  — all behavior (metrics, health, cache, selector, store, …)

pub mod atoms;
pub mod engine;

pub use atoms::error::{GatewayError, GatewayResult};
pub use engine::service::ChannelService;
