// ── Modelgate Engine: HTTP Clients & Fallback-Walk Backoff ─────────────────
//
// Shared HTTP utilities used by the channel cache and the execution layer.
//
// Features:
//   • Per-channel `reqwest::Client` factory honoring the channel's proxy
//   • Pure backoff computation for the transient-failure fallback walk —
//     the execution layer sleeps; selection and recording never block here
//   • Retry on 429 (rate limit), 500, 502, 503, 504, 529; credential-level
//     statuses route to auto-disable instead

use std::time::{Duration, SystemTime};

use reqwest::Client;

use crate::atoms::error::GatewayResult;
use crate::engine::types::ProxyConfig;

// ── Constants ──────────────────────────────────────────────────────────────

/// How many times the execution layer walks down the candidate list before
/// surfacing the failure.
pub const MAX_RETRIES: u32 = 3;

/// First backoff step in milliseconds; doubles per attempt.
const BACKOFF_BASE_MS: u64 = 1_000;

/// Ceiling for a single backoff step.
const BACKOFF_CAP_MS: u64 = 30_000;

/// Longest `Retry-After` hint honored; upstreams asking for more wait the
/// cap instead.
const RETRY_AFTER_CAP: Duration = Duration::from_secs(60);

const CONNECT_TIMEOUT_SECS: u64 = 10;
const REQUEST_TIMEOUT_SECS: u64 = 120;

// ── Client factory ─────────────────────────────────────────────────────────

/// Build the HTTP executor for one channel, honoring its proxy config.
/// Clients are scoped to a live channel instance and replaced on reload.
pub fn client_with_proxy(proxy: &ProxyConfig) -> GatewayResult<Client> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS));

    builder = match proxy {
        ProxyConfig::None => builder,
        ProxyConfig::Http { url } => builder.proxy(reqwest::Proxy::all(url)?),
        ProxyConfig::Socks5 { url } => builder.proxy(reqwest::Proxy::all(url)?),
    };

    Ok(builder.build()?)
}

// ── Retryable status detection ─────────────────────────────────────────────

/// Check if an HTTP status code represents a transient/retryable error.
/// Credential-level statuses (401/403/404) are deliberately absent — those
/// feed auto-disable, not retry.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504 | 529)
}

// ── Fallback-walk backoff ──────────────────────────────────────────────────

/// Delay before retry attempt `attempt` (0-based) against the next
/// candidate channel. Doubles from 1s up to the 30s cap; an upstream
/// `Retry-After` hint raises the wait (never shortens it) up to 60s. The
/// result carries ±25% jitter so concurrent requests retrying against the
/// same recovering channel do not land in one burst.
pub fn retry_backoff(attempt: u32, retry_after: Option<Duration>) -> Duration {
    let doubled = BACKOFF_BASE_MS.saturating_mul(1u64 << attempt.min(16));
    let mut delay_ms = doubled.min(BACKOFF_CAP_MS);
    if let Some(hint) = retry_after {
        let hint_ms = hint.min(RETRY_AFTER_CAP).as_millis() as u64;
        delay_ms = delay_ms.max(hint_ms);
    }
    Duration::from_millis(despread(delay_ms))
}

/// Spread a delay across [base − 25%, base + 25%], floored at 100ms.
/// Clock nanos stand in for an RNG — de-syncing a retry herd does not
/// need one.
fn despread(base_ms: u64) -> u64 {
    let spread = base_ms / 4;
    if spread == 0 {
        return base_ms.max(100);
    }
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    (base_ms - spread + nanos % (2 * spread + 1)).max(100)
}

/// Seconds from an upstream `Retry-After` header. Integer form only —
/// providers that send HTTP-dates get the computed backoff instead.
pub fn retry_after_hint(header_value: &str) -> Option<Duration> {
    header_value
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// ── Tests ──────────────────────────────────────────────────────────────────
