// Modelgate Engine — Sliding-Window Channel Metrics
// Per-channel success/failure counters in a time-bucketed ring with an
// aggregate roll-up. Selections are counted before the request completes
// so bursts of concurrent requests do not all pick the same winner; a
// canceled outcome offsets its selection-time increment.
//
// Locking discipline: the registry map takes a read lock for lookup and a
// write lock only to insert a brand-new ChannelMetrics; each channel's
// slots and aggregate are modified together under that channel's own lock.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};

use crate::atoms::constants::METRICS_WINDOW_SECS;
use crate::engine::types::PerformanceRecord;

// ── Types ──────────────────────────────────────────────────────────────────

/// One second of traffic for one channel.
#[derive(Debug, Clone, Default)]
pub struct TimeSlot {
    /// Unix second this slot covers.
    pub timestamp: i64,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
}

impl TimeSlot {
    fn new(timestamp: i64) -> Self {
        TimeSlot {
            timestamp,
            ..Default::default()
        }
    }
}

/// Roll-up over the live window plus any durable seed.
#[derive(Debug, Clone, Default)]
pub struct Aggregated {
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Length of the trailing run of non-canceled failures.
    pub consecutive_failures: u32,
    pub last_selected_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// What the selector reads: the failure streak plus the live-window totals.
#[derive(Debug, Clone, Copy, Default)]
pub struct HealthView {
    pub consecutive_failures: u32,
    pub window_requests: u64,
    pub window_failures: u64,
}

impl HealthView {
    /// Fraction of recent requests that failed; 0.0 on an empty window.
    pub fn failure_ratio(&self) -> f64 {
        if self.window_requests == 0 {
            0.0
        } else {
            self.window_failures as f64 / self.window_requests as f64
        }
    }
}

struct MetricsInner {
    /// Ordered by timestamp so eviction is O(k) in expired slots.
    slots: VecDeque<TimeSlot>,
    aggregated: Aggregated,
}

/// All counters for one channel, guarded by a single lock so the slot and
/// the aggregate never diverge mid-update.
pub struct ChannelMetrics {
    inner: Mutex<MetricsInner>,
    window_secs: i64,
}

impl ChannelMetrics {
    fn new(window_secs: i64) -> Self {
        ChannelMetrics {
            inner: Mutex::new(MetricsInner {
                slots: VecDeque::new(),
                aggregated: Aggregated::default(),
            }),
            window_secs,
        }
    }

    /// Drop slots older than `now - window`, subtracting their counters
    /// from the aggregate. Never recomputes the aggregate from scratch.
    fn evict_expired(inner: &mut MetricsInner, now_sec: i64, window_secs: i64) {
        let cutoff = now_sec - window_secs;
        while let Some(slot) = inner.slots.front() {
            if slot.timestamp >= cutoff {
                break;
            }
            let (requests, successes, failures) = (slot.requests, slot.successes, slot.failures);
            inner.slots.pop_front();
            let agg = &mut inner.aggregated;
            agg.requests = agg.requests.saturating_sub(requests);
            agg.successes = agg.successes.saturating_sub(successes);
            agg.failures = agg.failures.saturating_sub(failures);
        }
    }

    fn record_selection(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock();
        inner.aggregated.requests += 1;
        inner.aggregated.last_selected_at = Some(now);
    }

    fn record_outcome(&self, perf: &PerformanceRecord) {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        let sec = perf.end_time.timestamp();
        Self::evict_expired(inner, sec, self.window_secs);

        if !perf.success && perf.canceled {
            // A cancel offsets the selection-time increment and records
            // nothing in the slot. The clamp covers a cancel that is
            // reordered ahead of its selection.
            inner.aggregated.requests = inner.aggregated.requests.saturating_sub(1);
            return;
        }

        let idx = match inner.slots.binary_search_by_key(&sec, |s| s.timestamp) {
            Ok(i) => i,
            Err(i) => {
                inner.slots.insert(i, TimeSlot::new(sec));
                i
            }
        };
        // Attribute the earlier selection to this outcome's second so that
        // window eviction keeps the aggregate equal to the live slots.
        {
            let slot = &mut inner.slots[idx];
            slot.requests += 1;
            if perf.success {
                slot.successes += 1;
            } else {
                slot.failures += 1;
            }
        }

        let agg = &mut inner.aggregated;
        if perf.success {
            agg.successes += 1;
            agg.last_selected_at = Some(perf.end_time);
            agg.consecutive_failures = 0;
        } else {
            agg.failures += 1;
            agg.last_failure_at = Some(perf.end_time);
            agg.consecutive_failures += 1;
        }
    }

    /// Initialize the aggregate from a durable historical scan. Only
    /// meaningful before live traffic arrives.
    pub fn seed(&self, requests: u64, successes: u64, failures: u64) {
        let mut inner = self.inner.lock();
        inner.aggregated.requests += requests;
        inner.aggregated.successes += successes;
        inner.aggregated.failures += failures;
    }

    pub fn aggregated(&self) -> Aggregated {
        self.inner.lock().aggregated.clone()
    }

    /// Evicts as of `now`, then reports the streak and live-window totals.
    pub fn health_view(&self, now: DateTime<Utc>) -> HealthView {
        let mut inner = self.inner.lock();
        Self::evict_expired(&mut inner, now.timestamp(), self.window_secs);
        let (window_requests, window_failures) = inner
            .slots
            .iter()
            .fold((0u64, 0u64), |(r, f), s| (r + s.requests, f + s.failures));
        HealthView {
            consecutive_failures: inner.aggregated.consecutive_failures,
            window_requests,
            window_failures,
        }
    }
}

// ── Registry ───────────────────────────────────────────────────────────────

/// Per-channel metrics, created lazily on first selection or first outcome
/// and kept for the life of the process.
pub struct MetricsRegistry {
    channels: RwLock<HashMap<i64, Arc<ChannelMetrics>>>,
    window_secs: i64,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(METRICS_WINDOW_SECS)
    }
}

impl MetricsRegistry {
    pub fn new(window_secs: i64) -> Self {
        MetricsRegistry {
            channels: RwLock::new(HashMap::new()),
            window_secs,
        }
    }

    pub fn get(&self, channel_id: i64) -> Option<Arc<ChannelMetrics>> {
        self.channels.read().get(&channel_id).cloned()
    }

    fn get_or_create(&self, channel_id: i64) -> Arc<ChannelMetrics> {
        if let Some(m) = self.channels.read().get(&channel_id) {
            return m.clone();
        }
        let mut map = self.channels.write();
        map.entry(channel_id)
            .or_insert_with(|| Arc::new(ChannelMetrics::new(self.window_secs)))
            .clone()
    }

    /// Called synchronously on every channel pick, before the request
    /// completes, to damp repeat selections during bursts.
    pub fn record_selection(&self, channel_id: i64) {
        if channel_id <= 0 {
            return;
        }
        self.get_or_create(channel_id).record_selection(Utc::now());
    }

    /// Apply one outcome. Invalid records (non-positive channel id, or a
    /// request that never completed) are a no-op.
    pub fn record_outcome(&self, perf: &PerformanceRecord) {
        if perf.channel_id <= 0 || !perf.request_completed {
            return;
        }
        self.get_or_create(perf.channel_id).record_outcome(perf);
    }

    /// Seed a channel's aggregate from a durable historical scan.
    pub fn seed(&self, channel_id: i64, requests: u64, successes: u64, failures: u64) {
        if channel_id <= 0 {
            return;
        }
        self.get_or_create(channel_id).seed(requests, successes, failures);
    }

    pub fn health_view(&self, channel_id: i64, now: DateTime<Utc>) -> HealthView {
        match self.get(channel_id) {
            Some(m) => m.health_view(now),
            None => HealthView::default(),
        }
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

    fn outcome(channel_id: i64, sec: i64, success: bool) -> PerformanceRecord {
        PerformanceRecord {
            channel_id,
            api_key: None,
            end_time: at(sec),
            success,
            canceled: false,
            request_completed: true,
            error_status_code: if success { None } else { Some(500) },
        }
    }

    fn cancel(channel_id: i64, sec: i64) -> PerformanceRecord {
        PerformanceRecord {
            canceled: true,
            success: false,
            ..outcome(channel_id, sec, false)
        }
    }

    #[test]
    fn consecutive_failure_reset() {
        // Three failures (500, 429, 500) then one success.
        let reg = MetricsRegistry::default();
        let base = 1_700_000_000;
        for (i, code) in [500u16, 429, 500].iter().enumerate() {
            reg.record_selection(1);
            let mut p = outcome(1, base + i as i64, false);
            p.error_status_code = Some(*code);
            reg.record_outcome(&p);
        }
        reg.record_selection(1);
        reg.record_outcome(&outcome(1, base + 3, true));

        let agg = reg.get(1).unwrap().aggregated();
        assert_eq!(agg.requests, 4);
        assert_eq!(agg.successes, 1);
        assert_eq!(agg.failures, 3);
        assert_eq!(agg.consecutive_failures, 0);
        assert!(agg.last_failure_at.is_some());
        assert_eq!(agg.last_selected_at, Some(at(base + 3)));
    }

    #[test]
    fn window_eviction_keeps_only_live_slots() {
        // Window = 10s; slots at t-9..t-0, then a record at t+15.
        let reg = MetricsRegistry::new(10);
        let t = 1_700_000_100;
        for i in 0..10 {
            reg.record_selection(7);
            reg.record_outcome(&outcome(7, t - 9 + i, true));
        }
        reg.record_selection(7);
        reg.record_outcome(&outcome(7, t + 15, false));

        let m = reg.get(7).unwrap();
        let agg = m.aggregated();
        assert_eq!(agg.requests, 1);
        assert_eq!(agg.successes, 0);
        assert_eq!(agg.failures, 1);

        let view = m.health_view(at(t + 15));
        assert_eq!(view.window_requests, 1);
        assert_eq!(view.window_failures, 1);
    }

    #[test]
    fn aggregate_equals_live_slot_sums() {
        let reg = MetricsRegistry::default();
        let base = 1_700_000_000;
        for i in 0..20 {
            reg.record_selection(3);
            reg.record_outcome(&outcome(3, base + i, i % 3 != 0));
        }
        let m = reg.get(3).unwrap();
        let agg = m.aggregated();
        assert!(agg.successes + agg.failures <= agg.requests);
        let view = m.health_view(at(base + 19));
        assert_eq!(view.window_requests, agg.successes + agg.failures);
        assert_eq!(view.window_failures, agg.failures);
    }

    #[test]
    fn consecutive_failures_track_trailing_run() {
        let reg = MetricsRegistry::default();
        let base = 1_700_000_000;
        let pattern = [false, false, true, false, false, false];
        for (i, &ok) in pattern.iter().enumerate() {
            reg.record_selection(5);
            reg.record_outcome(&outcome(5, base + i as i64, ok));
        }
        assert_eq!(reg.get(5).unwrap().aggregated().consecutive_failures, 3);

        // A cancel leaves the streak unchanged.
        reg.record_selection(5);
        reg.record_outcome(&cancel(5, base + 10));
        assert_eq!(reg.get(5).unwrap().aggregated().consecutive_failures, 3);
    }

    #[test]
    fn cancel_offsets_selection_and_clamps_at_zero() {
        let reg = MetricsRegistry::default();
        reg.record_selection(2);
        reg.record_outcome(&cancel(2, 1_700_000_000));
        let agg = reg.get(2).unwrap().aggregated();
        assert_eq!(agg.requests, 0);
        assert_eq!(agg.failures, 0);

        // Cancel reordered ahead of its selection must not underflow.
        reg.record_outcome(&cancel(2, 1_700_000_001));
        assert_eq!(reg.get(2).unwrap().aggregated().requests, 0);
    }

    #[test]
    fn invalid_records_are_ignored() {
        let reg = MetricsRegistry::default();
        reg.record_outcome(&outcome(0, 1_700_000_000, true));
        reg.record_outcome(&outcome(-4, 1_700_000_000, true));
        let mut p = outcome(9, 1_700_000_000, true);
        p.request_completed = false;
        reg.record_outcome(&p);
        assert!(reg.get(0).is_none());
        assert!(reg.get(-4).is_none());
        assert!(reg.get(9).is_none());
    }

    #[test]
    fn out_of_order_outcomes_keep_slots_sorted() {
        let reg = MetricsRegistry::default();
        let base = 1_700_000_000;
        for sec in [base + 5, base + 2, base + 8, base + 2] {
            reg.record_selection(4);
            reg.record_outcome(&outcome(4, sec, true));
        }
        let m = reg.get(4).unwrap();
        let view = m.health_view(at(base + 8));
        assert_eq!(view.window_requests, 4);
        let agg = m.aggregated();
        assert_eq!(agg.successes, 4);
    }

    #[test]
    fn seed_initializes_aggregate() {
        let reg = MetricsRegistry::default();
        reg.seed(11, 100, 90, 10);
        let agg = reg.get(11).unwrap().aggregated();
        assert_eq!(agg.requests, 100);
        assert_eq!(agg.successes, 90);
        assert_eq!(agg.failures, 10);
    }
}
