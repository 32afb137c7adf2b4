// Modelgate Engine — Auto-Disable Controller
// Classifies failing outcomes into per-(channel, code) and
// per-(channel, key, code) counters and decides when a channel must be
// disabled or a key rotated out. Counters are runtime-only: a success
// clears them, which makes the thresholds "within a failure streak"
// rather than lifetime. The store writes themselves are performed by the
// service on a best-effort detached path.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;

use crate::engine::types::{AutoDisablePolicy, ChannelStatus, PerformanceRecord};

// ── Decision ───────────────────────────────────────────────────────────────

/// What the controller wants done. The caller owns persistence and the
/// cache-reload signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableAction {
    None,
    /// Transition the channel to Disabled with this error message.
    DisableChannel { channel_id: i64, error_message: String },
    /// Rotate this key out of the channel's credentials list (disabling the
    /// channel if no keys remain).
    FailKey { channel_id: i64, api_key: String },
}

// ── Counters ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct ErrorCount {
    count: u32,
    last_updated: DateTime<Utc>,
}

/// Per-(channel, code) and per-(channel, key, code) failure streak counts.
/// Separate locks per table, per the shared-resource discipline.
#[derive(Default)]
pub struct HealthController {
    channel_errors: Mutex<HashMap<i64, HashMap<u16, ErrorCount>>>,
    key_errors: Mutex<HashMap<(i64, String), HashMap<u16, ErrorCount>>>,
}

impl HealthController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump one counter, restarting it when the previous entry is staler
    /// than the policy window. Returns the new count.
    fn bump(
        counts: &mut HashMap<u16, ErrorCount>,
        code: u16,
        now: DateTime<Utc>,
        window_secs: i64,
    ) -> u32 {
        let entry = counts.entry(code).or_insert(ErrorCount {
            count: 0,
            last_updated: now,
        });
        if (now - entry.last_updated).num_seconds() > window_secs {
            entry.count = 0;
        }
        entry.count += 1;
        entry.last_updated = now;
        entry.count
    }

    /// Classify a failing, non-canceled outcome. Outcomes without an HTTP
    /// status (transport errors) are counted under code 0.
    ///
    /// `current_status` is the channel's persisted status at outcome time.
    /// A channel that is already out of service accumulates nothing — the
    /// reload path owns propagation, and a second disable write must not
    /// fire.
    pub fn on_failure(
        &self,
        perf: &PerformanceRecord,
        policy: &AutoDisablePolicy,
        current_status: ChannelStatus,
    ) -> DisableAction {
        if !policy.enabled {
            return DisableAction::None;
        }
        if current_status != ChannelStatus::Enabled {
            return DisableAction::None;
        }
        let code = perf.error_status_code.unwrap_or(0);
        let now = perf.end_time;
        let unrecoverable = policy.unrecoverable_codes.contains(&code);

        // Key-scoped path takes precedence: a bad key should rotate before
        // the whole channel is condemned.
        if let Some(key) = perf.api_key.as_deref() {
            let mut table = self.key_errors.lock();
            let counts = table
                .entry((perf.channel_id, key.to_string()))
                .or_default();
            let count = Self::bump(counts, code, now, policy.per_code_window_secs);
            if count >= policy.key_threshold_per_code || unrecoverable {
                warn!(
                    "[health] channel {} key …{} failed (code {}, {} in window) — rotating",
                    perf.channel_id,
                    key_tail(key),
                    code,
                    count
                );
                table.remove(&(perf.channel_id, key.to_string()));
                return DisableAction::FailKey {
                    channel_id: perf.channel_id,
                    api_key: key.to_string(),
                };
            }
            return DisableAction::None;
        }

        let mut table = self.channel_errors.lock();
        let counts = table.entry(perf.channel_id).or_default();
        let count = Self::bump(counts, code, now, policy.per_code_window_secs);
        if count >= policy.channel_threshold_per_code || unrecoverable {
            warn!(
                "[health] channel {} tripped on code {} ({} in window) — disabling",
                perf.channel_id, code, count
            );
            table.remove(&perf.channel_id);
            return DisableAction::DisableChannel {
                channel_id: perf.channel_id,
                error_message: status_text(code).to_string(),
            };
        }
        DisableAction::None
    }

    /// A success clears the channel's whole entry and, when the key is
    /// known, the key sub-entry.
    pub fn on_success(&self, channel_id: i64, api_key: Option<&str>) {
        self.channel_errors.lock().remove(&channel_id);
        if let Some(key) = api_key {
            self.key_errors
                .lock()
                .remove(&(channel_id, key.to_string()));
        }
    }
}

fn key_tail(key: &str) -> &str {
    let len = key.len();
    &key[len.saturating_sub(4)..]
}

/// Reason phrase stored as the channel's error message when auto-disable
/// trips.
pub fn status_text(code: u16) -> &'static str {
    match code {
        0 => "connection error",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        408 => "Request Timeout",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        529 => "Overloaded",
        _ => "Upstream Error",
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(sec: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(sec, 0).unwrap()
    }

    fn failure(channel_id: i64, sec: i64, code: u16, key: Option<&str>) -> PerformanceRecord {
        PerformanceRecord {
            channel_id,
            api_key: key.map(|k| k.to_string()),
            end_time: at(sec),
            success: false,
            canceled: false,
            request_completed: true,
            error_status_code: Some(code),
        }
    }

    fn policy(channel_threshold: u32, key_threshold: u32) -> AutoDisablePolicy {
        AutoDisablePolicy {
            channel_threshold_per_code: channel_threshold,
            key_threshold_per_code: key_threshold,
            ..Default::default()
        }
    }

    #[test]
    fn channel_disables_at_threshold() {
        let hc = HealthController::new();
        let p = policy(3, 3);
        let t = 1_700_000_000;
        assert_eq!(hc.on_failure(&failure(1, t, 500, None), &p, ChannelStatus::Enabled), DisableAction::None);
        assert_eq!(hc.on_failure(&failure(1, t + 1, 500, None), &p, ChannelStatus::Enabled), DisableAction::None);
        assert_eq!(
            hc.on_failure(&failure(1, t + 2, 500, None), &p, ChannelStatus::Enabled),
            DisableAction::DisableChannel {
                channel_id: 1,
                error_message: "Internal Server Error".into()
            }
        );
    }

    #[test]
    fn counts_are_per_error_code() {
        let hc = HealthController::new();
        let p = policy(3, 3);
        let t = 1_700_000_000;
        // Alternating codes never reach 3 on either.
        assert_eq!(hc.on_failure(&failure(1, t, 500, None), &p, ChannelStatus::Enabled), DisableAction::None);
        assert_eq!(hc.on_failure(&failure(1, t + 1, 429, None), &p, ChannelStatus::Enabled), DisableAction::None);
        assert_eq!(hc.on_failure(&failure(1, t + 2, 500, None), &p, ChannelStatus::Enabled), DisableAction::None);
        assert_eq!(hc.on_failure(&failure(1, t + 3, 429, None), &p, ChannelStatus::Enabled), DisableAction::None);
        // Third 500 trips.
        assert!(matches!(
            hc.on_failure(&failure(1, t + 4, 500, None), &p, ChannelStatus::Enabled),
            DisableAction::DisableChannel { .. }
        ));
    }

    #[test]
    fn unrecoverable_code_disables_immediately() {
        let hc = HealthController::new();
        let p = policy(100, 100);
        assert_eq!(
            hc.on_failure(&failure(2, 1_700_000_000, 401, None), &p, ChannelStatus::Enabled),
            DisableAction::DisableChannel {
                channel_id: 2,
                error_message: "Unauthorized".into()
            }
        );
    }

    #[test]
    fn key_failures_rotate_the_key_not_the_channel() {
        let hc = HealthController::new();
        let p = policy(3, 2);
        let t = 1_700_000_000;
        assert_eq!(
            hc.on_failure(&failure(1, t, 500, Some("sk-a")), &p, ChannelStatus::Enabled),
            DisableAction::None
        );
        assert_eq!(
            hc.on_failure(&failure(1, t + 1, 500, Some("sk-a")), &p, ChannelStatus::Enabled),
            DisableAction::FailKey {
                channel_id: 1,
                api_key: "sk-a".into()
            }
        );
        // The channel-level table was never touched.
        assert!(hc.channel_errors.lock().get(&1).is_none());
    }

    #[test]
    fn unrecoverable_code_fails_key_immediately() {
        let hc = HealthController::new();
        let p = policy(100, 100);
        assert_eq!(
            hc.on_failure(&failure(3, 1_700_000_000, 403, Some("sk-b")), &p, ChannelStatus::Enabled),
            DisableAction::FailKey {
                channel_id: 3,
                api_key: "sk-b".into()
            }
        );
    }

    #[test]
    fn success_clears_the_streak() {
        let hc = HealthController::new();
        let p = policy(3, 3);
        let t = 1_700_000_000;
        hc.on_failure(&failure(1, t, 500, None), &p, ChannelStatus::Enabled);
        hc.on_failure(&failure(1, t + 1, 500, None), &p, ChannelStatus::Enabled);
        hc.on_success(1, None);
        // Streak restarted: two more failures still below threshold.
        assert_eq!(hc.on_failure(&failure(1, t + 2, 500, None), &p, ChannelStatus::Enabled), DisableAction::None);
        assert_eq!(hc.on_failure(&failure(1, t + 3, 500, None), &p, ChannelStatus::Enabled), DisableAction::None);
    }

    #[test]
    fn stale_counts_restart_after_window() {
        let hc = HealthController::new();
        let mut p = policy(3, 3);
        p.per_code_window_secs = 60;
        let t = 1_700_000_000;
        hc.on_failure(&failure(1, t, 500, None), &p, ChannelStatus::Enabled);
        hc.on_failure(&failure(1, t + 1, 500, None), &p, ChannelStatus::Enabled);
        // Third failure lands well past the window — counter restarted.
        assert_eq!(
            hc.on_failure(&failure(1, t + 120, 500, None), &p, ChannelStatus::Enabled),
            DisableAction::None
        );
    }

    #[test]
    fn already_disabled_channel_accumulates_nothing() {
        let hc = HealthController::new();
        let p = policy(3, 3);
        let t = 1_700_000_000;

        // Failures against a disabled channel never touch the counters,
        // even for unrecoverable codes or key-scoped outcomes.
        for i in 0..5 {
            assert_eq!(
                hc.on_failure(&failure(1, t + i, 500, None), &p, ChannelStatus::Disabled),
                DisableAction::None
            );
        }
        assert_eq!(
            hc.on_failure(&failure(1, t + 5, 401, None), &p, ChannelStatus::Disabled),
            DisableAction::None
        );
        assert_eq!(
            hc.on_failure(&failure(1, t + 6, 403, Some("sk-a")), &p, ChannelStatus::Disabled),
            DisableAction::None
        );
        assert!(hc.channel_errors.lock().get(&1).is_none());
        assert!(hc.key_errors.lock().is_empty());

        // Once re-enabled, the streak starts from one — the disabled-era
        // failures left no residue.
        assert_eq!(
            hc.on_failure(&failure(1, t + 10, 500, None), &p, ChannelStatus::Enabled),
            DisableAction::None
        );
        assert_eq!(
            hc.on_failure(&failure(1, t + 11, 500, None), &p, ChannelStatus::Enabled),
            DisableAction::None
        );
        assert!(matches!(
            hc.on_failure(&failure(1, t + 12, 500, None), &p, ChannelStatus::Enabled),
            DisableAction::DisableChannel { .. }
        ));
    }

    #[test]
    fn archived_channel_accumulates_nothing() {
        let hc = HealthController::new();
        let p = policy(1, 1);
        assert_eq!(
            hc.on_failure(
                &failure(4, 1_700_000_000, 500, None),
                &p,
                ChannelStatus::Archived
            ),
            DisableAction::None
        );
    }

    #[test]
    fn disabled_policy_is_a_noop() {
        let hc = HealthController::new();
        let p = AutoDisablePolicy {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(
            hc.on_failure(&failure(1, 1_700_000_000, 401, None), &p, ChannelStatus::Enabled),
            DisableAction::None
        );
    }

    #[test]
    fn transport_errors_count_under_code_zero() {
        let hc = HealthController::new();
        let p = policy(2, 2);
        let mut f = failure(1, 1_700_000_000, 500, None);
        f.error_status_code = None;
        assert_eq!(hc.on_failure(&f, &p, ChannelStatus::Enabled), DisableAction::None);
        let mut f2 = failure(1, 1_700_000_001, 500, None);
        f2.error_status_code = None;
        assert_eq!(
            hc.on_failure(&f2, &p, ChannelStatus::Enabled),
            DisableAction::DisableChannel {
                channel_id: 1,
                error_message: "connection error".into()
            }
        );
    }
}
