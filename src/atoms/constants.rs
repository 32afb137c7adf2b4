// ── Modelgate Atoms: Constants ─────────────────────────────────────────────
// All named constants for the crate live here.
// Rationale: collecting constants in one place eliminates magic strings,
// makes auditing easier, and keeps every layer's code self-documenting.

// ── Sliding-window metrics ─────────────────────────────────────────────────
// Window width for per-channel success/failure tracking. Slots older than
// this are evicted and their counters subtracted from the aggregate.
pub const METRICS_WINDOW_SECS: i64 = 600;

// ── Performance outcome queue ──────────────────────────────────────────────
// Bounded queue between the request-serving layer and the single outcome
// consumer task. When full, producers fall back to recording synchronously.
pub const PERF_QUEUE_CAPACITY: usize = 1024;

// ── Channel cache reload cadence ───────────────────────────────────────────
// The periodic reload runs on this interval; write-triggered reloads run
// immediately with the deadline below. Both paths coexist — a double reload
// hits the latest_update early exit and is a cheap no-op.
pub const CACHE_RELOAD_INTERVAL_SECS: u64 = 60;
pub const CACHE_RELOAD_DEADLINE_SECS: u64 = 10;

// ── Auto-disable controller ────────────────────────────────────────────────
// Defaults for the system policy; the live values come from system settings.
pub const AUTO_DISABLE_WINDOW_SECS: i64 = 600;
pub const AUTO_DISABLE_CHANNEL_THRESHOLD: u32 = 5;
pub const AUTO_DISABLE_KEY_THRESHOLD: u32 = 3;
pub const AUTO_DISABLE_UNRECOVERABLE_CODES: &[u16] = &[401, 403, 404];

// Detached store writes from the health controller must not block the
// request path; they are abandoned (and logged) after this long.
pub const AUTO_DISABLE_WRITE_TIMEOUT_SECS: u64 = 5;

// ── Override merge ─────────────────────────────────────────────────────────
// A template header carrying this value deletes the matching existing header
// instead of replacing it. Treat as a stable wire constant.
pub const HEADER_CLEAR_DIRECTIVE: &str = "__CLEAR__";

// ── Backup document versions ───────────────────────────────────────────────
// Version written by export. Restore accepts the current version plus the
// listed legacy versions; anything else is rejected.
pub const BACKUP_VERSION: &str = "1.1";
pub const BACKUP_VERSIONS_ACCEPTED: &[&str] = &["1.1", "1.0"];

// ── Restore fallbacks ──────────────────────────────────────────────────────
// API keys restored with an empty project name bind to this project; if it
// does not exist the key is skipped.
pub const DEFAULT_PROJECT_NAME: &str = "Default";
