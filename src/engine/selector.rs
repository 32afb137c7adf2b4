// Modelgate Engine — Channel Selector
// Filters the cache snapshot down to channels that can serve the requested
// model, scores each against its live health, and returns the fallback
// order for the execution layer. The winner's selection counter is bumped
// before returning so concurrent bursts spread across channels.

use std::sync::Arc;

use chrono::Utc;
use log::debug;

use crate::engine::cache::{LiveChannel, Snapshot};
use crate::engine::metrics::{HealthView, MetricsRegistry};
use crate::engine::types::InboundRequest;

/// Selection-time score: the configured weight damped by the failure
/// streak and the recent failure ratio. With a clean window and no streak
/// this is exactly the configured weight; it strictly decreases as the
/// streak grows and never increases with the failure ratio.
pub fn effective_weight(configured_weight: i64, health: &HealthView) -> f64 {
    let base = configured_weight.max(1) as f64;
    base / (1.0 + health.consecutive_failures as f64) * (1.0 - health.failure_ratio() / 2.0)
}

pub struct ChannelSelector {
    metrics: Arc<MetricsRegistry>,
}

impl ChannelSelector {
    pub fn new(metrics: Arc<MetricsRegistry>) -> Self {
        ChannelSelector { metrics }
    }

    /// Candidates for one inbound request, best first. The returned order
    /// is the fallback order on transient failure; it is deterministic
    /// given identical metrics. Empty when no enabled channel supports the
    /// model.
    pub fn choose_channels(
        &self,
        snapshot: &Snapshot,
        request: &InboundRequest,
    ) -> Vec<Arc<LiveChannel>> {
        let mut candidates: Vec<Arc<LiveChannel>> = snapshot
            .iter()
            .filter(|live| live.is_model_supported(&request.model))
            .cloned()
            .collect();

        if candidates.is_empty() {
            return candidates;
        }

        if candidates.len() > 1 {
            let now = Utc::now();
            let mut scored: Vec<(f64, Arc<LiveChannel>)> = candidates
                .drain(..)
                .map(|live| {
                    let health = self.metrics.health_view(live.channel.id, now);
                    let score = effective_weight(live.channel.weight, &health);
                    (score, live)
                })
                .collect();
            scored.sort_by(|(sa, a), (sb, b)| {
                sb.partial_cmp(sa)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.channel.weight.cmp(&a.channel.weight))
                    .then_with(|| a.channel.id.cmp(&b.channel.id))
            });
            candidates = scored.into_iter().map(|(_, live)| live).collect();
        }

        let chosen = &candidates[0];
        debug!(
            "[selector] model '{}' → channel '{}' ({} candidate(s))",
            request.model,
            chosen.channel.name,
            candidates.len()
        );
        self.metrics.record_selection(chosen.channel.id);
        candidates
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cache::LiveChannel;
    use crate::engine::types::*;
    use chrono::TimeZone;

    fn live(id: i64, name: &str, weight: i64, models: &[&str]) -> Arc<LiveChannel> {
        let channel = Channel {
            id,
            name: name.into(),
            channel_type: ChannelType::OpenAi,
            base_url: None,
            credentials: Credentials::ApiKey("sk-test".into()),
            status: ChannelStatus::Enabled,
            weight,
            supported_models: models.iter().map(|m| m.to_string()).collect(),
            auto_sync: false,
            default_test_model: None,
            tags: vec![],
            settings: ChannelSettings::default(),
            error_message: None,
            created_at: String::new(),
            updated_at: String::new(),
        };
        Arc::new(LiveChannel::build(channel, vec![]).unwrap())
    }

    fn request(model: &str) -> InboundRequest {
        InboundRequest {
            kind: RequestKind::Completion,
            model: model.into(),
        }
    }

    fn failure(channel_id: i64, sec: i64) -> PerformanceRecord {
        PerformanceRecord {
            channel_id,
            api_key: None,
            end_time: Utc.timestamp_opt(sec, 0).unwrap(),
            success: false,
            canceled: false,
            request_completed: true,
            error_status_code: Some(500),
        }
    }

    #[test]
    fn unsupported_model_yields_empty_list() {
        let metrics = Arc::new(MetricsRegistry::default());
        let selector = ChannelSelector::new(metrics);
        let snapshot: Snapshot = Arc::new(vec![live(1, "a", 10, &["gpt-4"])]);
        assert!(selector
            .choose_channels(&snapshot, &request("claude-3"))
            .is_empty());
    }

    #[test]
    fn healthy_channels_order_by_configured_weight() {
        let metrics = Arc::new(MetricsRegistry::default());
        let selector = ChannelSelector::new(metrics);
        let snapshot: Snapshot = Arc::new(vec![
            live(1, "light", 5, &["gpt-4"]),
            live(2, "heavy", 50, &["gpt-4"]),
            live(3, "other", 99, &["claude-3"]),
        ]);
        let picked = selector.choose_channels(&snapshot, &request("gpt-4"));
        let names: Vec<_> = picked.iter().map(|l| l.channel.name.as_str()).collect();
        assert_eq!(names, vec!["heavy", "light"]);
    }

    #[test]
    fn failure_streak_demotes_a_channel() {
        let metrics = Arc::new(MetricsRegistry::default());
        let now = Utc::now().timestamp();
        for i in 0..5 {
            metrics.record_selection(2);
            metrics.record_outcome(&failure(2, now - 5 + i));
        }
        let selector = ChannelSelector::new(metrics);
        let snapshot: Snapshot = Arc::new(vec![
            live(1, "steady", 8, &["gpt-4"]),
            live(2, "flaky", 10, &["gpt-4"]),
        ]);
        let picked = selector.choose_channels(&snapshot, &request("gpt-4"));
        assert_eq!(picked[0].channel.name, "steady");
        assert_eq!(picked[1].channel.name, "flaky");
    }

    #[test]
    fn selection_counts_the_winner_only() {
        let metrics = Arc::new(MetricsRegistry::default());
        let selector = ChannelSelector::new(metrics.clone());
        let snapshot: Snapshot = Arc::new(vec![
            live(1, "a", 10, &["gpt-4"]),
            live(2, "b", 5, &["gpt-4"]),
        ]);
        selector.choose_channels(&snapshot, &request("gpt-4"));
        assert_eq!(metrics.get(1).unwrap().aggregated().requests, 1);
        assert!(metrics.get(2).is_none());
    }

    #[test]
    fn effective_weight_identity_at_zero_failures() {
        let clean = HealthView::default();
        assert_eq!(effective_weight(10, &clean), 10.0);
        assert_eq!(effective_weight(1, &clean), 1.0);
    }

    #[test]
    fn effective_weight_strictly_decreasing_in_streak() {
        let mut prev = f64::MAX;
        for cf in 0..10 {
            let view = HealthView {
                consecutive_failures: cf,
                window_requests: 0,
                window_failures: 0,
            };
            let w = effective_weight(10, &view);
            assert!(w < prev, "weight did not decrease at streak {}", cf);
            prev = w;
        }
    }

    #[test]
    fn effective_weight_non_increasing_in_failure_ratio() {
        let mut prev = f64::MAX;
        for failures in 0..=10 {
            let view = HealthView {
                consecutive_failures: 0,
                window_requests: 10,
                window_failures: failures,
            };
            let w = effective_weight(10, &view);
            assert!(w <= prev, "weight increased at ratio {}/10", failures);
            prev = w;
        }
    }
}
