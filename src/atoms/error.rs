// ── Modelgate Atoms: Error Types ───────────────────────────────────────────
// Single canonical error enum for the gateway core, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by failure kind (NotFound, Conflict,
//     Validation, Forbidden, Unsupported…) rather than by subsystem.
//   • The `#[from]` attribute wires store/serde/network conversions
//     automatically so `?` works across layer boundaries.
//   • No variant carries secret material (API keys, OAuth tokens) in its
//     message.

use thiserror::Error;

// ── Primary error enum ─────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Entity missing: channel, template, model, price row.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate name, duplicate header key, existing entity under
    /// strategy=error.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input: bad JSON, forbidden override key, mismatched
    /// template type, empty header key, credentials shape mismatch.
    #[error("validation: {0}")]
    Validation(String),

    /// Caller lacks the required privilege (owner-only operations).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// No enabled channel can serve the requested model, or a channel type
    /// has no transformer implementation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// SQLite / rusqlite store failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP / network failure (reqwest layer).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Upstream provider rejected the request (status + body excerpt).
    #[error("upstream error: {status}: {message}")]
    Upstream { status: u16, message: String },

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

// ── Convenience constructors ───────────────────────────────────────────────

impl GatewayError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(what: impl Into<String>) -> Self {
        Self::Conflict(what.into())
    }

    pub fn validation(what: impl Into<String>) -> Self {
        Self::Validation(what.into())
    }

    pub fn unsupported(what: impl Into<String>) -> Self {
        Self::Unsupported(what.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream { status, message: message.into() }
    }
}

// ── Convenience alias ──────────────────────────────────────────────────────

/// All gateway operations should return this type.
/// At HTTP handler boundaries, convert with `.map_err(|e| e.to_string())`.
pub type GatewayResult<T> = Result<T, GatewayError>;

// ── Conversion: GatewayError → String ──────────────────────────────────────
// Lets embedding layers with `Result<T, String>` call `.map_err(Into::into)`.

impl From<GatewayError> for String {
    fn from(e: GatewayError) -> Self {
        e.to_string()
    }
}
