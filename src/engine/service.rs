// Modelgate Engine — Channel Service
// The façade the request-serving layer talks to. Owns the cache, the
// metrics registry, the health controller, and the bounded outcome queue;
// wires auto-disable decisions into best-effort store writes and cache
// reload signals.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::atoms::constants::{AUTO_DISABLE_WRITE_TIMEOUT_SECS, PERF_QUEUE_CAPACITY};
use crate::atoms::error::{GatewayError, GatewayResult};
use crate::atoms::traits::{AuthContext, SystemSettingsSource};
use crate::engine::backup::{BackupOrchestrator, RestoreSummary};
use crate::engine::cache::{ChannelCache, LiveChannel};
use crate::engine::health::{DisableAction, HealthController};
use crate::engine::metrics::MetricsRegistry;
use crate::engine::selector::ChannelSelector;
use crate::engine::store::GatewayStore;
use crate::engine::templates::TemplateApplier;
use crate::engine::types::*;

pub struct ChannelService {
    store: Arc<GatewayStore>,
    cache: Arc<ChannelCache>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthController>,
    settings: Arc<dyn SystemSettingsSource>,
    selector: ChannelSelector,
    templates: TemplateApplier,
    backup: BackupOrchestrator,
    perf_tx: mpsc::Sender<PerformanceRecord>,
    /// Taken by `start()`; present only before the consumer task runs.
    perf_rx: Mutex<Option<mpsc::Receiver<PerformanceRecord>>>,
}

impl ChannelService {
    pub fn new(store: Arc<GatewayStore>, settings: Arc<dyn SystemSettingsSource>) -> Arc<Self> {
        let cache = Arc::new(ChannelCache::new(store.clone()));
        let metrics = Arc::new(MetricsRegistry::default());
        let (perf_tx, perf_rx) = mpsc::channel(PERF_QUEUE_CAPACITY);
        Arc::new(ChannelService {
            selector: ChannelSelector::new(metrics.clone()),
            templates: TemplateApplier::new(store.clone(), cache.clone()),
            backup: BackupOrchestrator::new(store.clone(), cache.clone()),
            store,
            cache,
            metrics,
            health: Arc::new(HealthController::new()),
            settings,
            perf_tx,
            perf_rx: Mutex::new(Some(perf_rx)),
        })
    }

    /// Load the cache and spawn the background tasks: the once-per-minute
    /// reload and the single FIFO outcome consumer.
    pub fn start(self: &Arc<Self>) {
        if let Err(e) = self.cache.load() {
            error!("[service] initial cache load failed: {}", e);
        }
        self.cache.spawn_periodic();

        if let Some(mut rx) = self.perf_rx.lock().take() {
            let service = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(perf) = rx.recv().await {
                    service.record_outcome(&perf);
                }
            });
        }
    }

    pub fn store(&self) -> &Arc<GatewayStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ChannelCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    // ── Selection ──────────────────────────────────────────────────────

    /// Candidates for one inbound request, best first — the fallback order
    /// for the execution layer. Errors when no enabled channel supports
    /// the model.
    pub fn choose_channels(&self, request: &InboundRequest) -> GatewayResult<Vec<Arc<LiveChannel>>> {
        let snapshot = self.cache.snapshot();
        let candidates = self.selector.choose_channels(&snapshot, request);
        if candidates.is_empty() {
            return Err(GatewayError::unsupported(format!(
                "no channel supports model '{}'",
                request.model
            )));
        }
        Ok(candidates)
    }

    // ── Outcome recording ──────────────────────────────────────────────

    /// Record one outcome synchronously: metrics first, then the
    /// auto-disable controller for failing, non-canceled requests.
    pub fn record_outcome(&self, perf: &PerformanceRecord) {
        if perf.channel_id <= 0 || !perf.request_completed {
            return;
        }
        self.metrics.record_outcome(perf);

        if perf.success {
            self.health.on_success(perf.channel_id, perf.api_key.as_deref());
            return;
        }
        if perf.canceled {
            return;
        }

        // Idempotence: a channel that is already Disabled (or deleted out
        // from under an in-flight request) must not accumulate error
        // counts or trigger another disable write — the reload path owns
        // propagation.
        let current_status = match self.store.get_channel(perf.channel_id) {
            Ok(ch) => ch.status,
            Err(e) => {
                debug!(
                    "[service] skipping health update for channel {}: {}",
                    perf.channel_id, e
                );
                return;
            }
        };

        let policy = self.settings.auto_disable_policy();
        match self.health.on_failure(perf, &policy, current_status) {
            DisableAction::None => {}
            DisableAction::DisableChannel { channel_id, error_message } => {
                self.disable_channel_detached(channel_id, error_message);
            }
            DisableAction::FailKey { channel_id, api_key } => {
                self.rotate_key_detached(channel_id, api_key);
            }
        }
    }

    /// Queue one outcome for the background consumer. When the queue is
    /// full the record is applied synchronously with a logged warning —
    /// metrics are best-effort, never back-pressure.
    pub fn record_outcome_async(&self, perf: PerformanceRecord) {
        match self.perf_tx.try_send(perf) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(perf)) => {
                warn!("[service] outcome queue full — recording synchronously");
                self.record_outcome(&perf);
            }
            Err(mpsc::error::TrySendError::Closed(perf)) => {
                self.record_outcome(&perf);
            }
        }
    }

    /// Disable a channel off the request path. Inside a runtime this is a
    /// detached write with a 5-second timeout; without one it runs inline.
    fn disable_channel_detached(&self, channel_id: i64, error_message: String) {
        let store = self.store.clone();
        let cache = self.cache.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let write = tokio::task::spawn_blocking(move || {
                        store.set_channel_status(
                            channel_id,
                            ChannelStatus::Disabled,
                            Some(&error_message),
                        )
                    });
                    match tokio::time::timeout(
                        Duration::from_secs(AUTO_DISABLE_WRITE_TIMEOUT_SECS),
                        write,
                    )
                    .await
                    {
                        Err(_) => warn!("[service] disable of channel {} timed out", channel_id),
                        Ok(Err(e)) => warn!("[service] disable write panicked: {}", e),
                        Ok(Ok(Err(e))) => {
                            warn!("[service] disable of channel {} failed: {}", channel_id, e)
                        }
                        Ok(Ok(Ok(()))) => {
                            info!("[service] channel {} auto-disabled", channel_id)
                        }
                    }
                    cache.schedule_reload();
                });
            }
            Err(_) => {
                if let Err(e) = store.set_channel_status(
                    channel_id,
                    ChannelStatus::Disabled,
                    Some(&error_message),
                ) {
                    warn!("[service] disable of channel {} failed: {}", channel_id, e);
                }
                cache.invalidate();
                if let Err(e) = cache.load() {
                    warn!("[service] reload after disable failed: {}", e);
                }
            }
        }
    }

    /// Rotate a failed key out of a channel's credentials list off the
    /// request path.
    fn rotate_key_detached(&self, channel_id: i64, api_key: String) {
        let store = self.store.clone();
        let cache = self.cache.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let write = tokio::task::spawn_blocking(move || {
                        store.rotate_channel_key(channel_id, &api_key)
                    });
                    match tokio::time::timeout(
                        Duration::from_secs(AUTO_DISABLE_WRITE_TIMEOUT_SECS),
                        write,
                    )
                    .await
                    {
                        Err(_) => {
                            warn!("[service] key rotation on channel {} timed out", channel_id)
                        }
                        Ok(Err(e)) => warn!("[service] key rotation panicked: {}", e),
                        Ok(Ok(Err(e))) => {
                            warn!("[service] key rotation on channel {} failed: {}", channel_id, e)
                        }
                        Ok(Ok(Ok(_))) => {}
                    }
                    cache.schedule_reload();
                });
            }
            Err(_) => {
                if let Err(e) = store.rotate_channel_key(channel_id, &api_key) {
                    warn!("[service] key rotation on channel {} failed: {}", channel_id, e);
                }
                cache.invalidate();
                if let Err(e) = cache.load() {
                    warn!("[service] reload after key rotation failed: {}", e);
                }
            }
        }
    }

    /// Reload the cache after a local mutation — asynchronously inside a
    /// runtime, inline otherwise.
    fn reload_after_write(&self) {
        match tokio::runtime::Handle::try_current() {
            Ok(_) => self.cache.schedule_reload(),
            Err(_) => {
                self.cache.invalidate();
                if let Err(e) = self.cache.load() {
                    warn!("[service] reload after write failed: {}", e);
                }
            }
        }
    }

    // ── Admin writes (each schedules a reload) ─────────────────────────

    pub fn create_channel(&self, ch: &Channel) -> GatewayResult<Channel> {
        let created = self.store.create_channel(ch)?;
        self.reload_after_write();
        Ok(created)
    }

    pub fn update_channel(&self, ch: &Channel) -> GatewayResult<()> {
        self.store.update_channel(ch)?;
        self.reload_after_write();
        Ok(())
    }

    pub fn delete_channel(&self, id: i64) -> GatewayResult<()> {
        self.store.delete_channel(id)?;
        self.reload_after_write();
        Ok(())
    }

    pub fn apply_template(&self, template_id: i64, channel_ids: &[i64]) -> GatewayResult<usize> {
        self.templates.apply_template(template_id, channel_ids)
    }

    // ── Backup / restore (owner-only, checked inside) ──────────────────

    pub fn export_backup(
        &self,
        auth: &dyn AuthContext,
        request: &BackupRequest,
    ) -> GatewayResult<BackupDocument> {
        self.backup.export(auth, request)
    }

    pub fn restore_backup(
        &self,
        auth: &dyn AuthContext,
        doc: &BackupDocument,
        options: &RestoreOptions,
    ) -> GatewayResult<RestoreSummary> {
        self.backup.restore(auth, doc, options)
    }

    // ── Channel testing ────────────────────────────────────────────────

    /// Probe a channel with its default test model (or its first supported
    /// model). The probe result is recorded as a normal outcome, so a
    /// failing test feeds the same counters live traffic would.
    pub async fn test_channel(&self, channel_id: i64) -> GatewayResult<()> {
        let channel = self.store.get_channel(channel_id)?;
        let model = channel
            .default_test_model
            .clone()
            .or_else(|| channel.supported_models.first().cloned())
            .ok_or_else(|| {
                GatewayError::validation(format!("channel '{}' has no model to test", channel.name))
            })?;

        let live = LiveChannel::build(channel.clone(), vec![])?;
        let actual_model = live.choose_model(&model).unwrap_or(model.as_str()).to_string();

        self.metrics.record_selection(channel_id);
        let result = live.transformer.probe(&live.http, &actual_model).await;

        let error_status_code = match &result {
            Ok(()) => None,
            Err(GatewayError::Upstream { status, .. }) => Some(*status),
            Err(_) => Some(0),
        };
        self.record_outcome(&PerformanceRecord {
            channel_id,
            api_key: channel.credentials.active_key().map(|k| k.to_string()),
            end_time: Utc::now(),
            success: result.is_ok(),
            canceled: false,
            request_completed: true,
            error_status_code,
        });

        if result.is_ok() && channel.error_message.is_some() {
            self.store
                .set_channel_status(channel_id, channel.status, None)?;
            self.reload_after_write();
        }
        result
    }

    /// Seed a channel's metrics aggregate from a durable historical scan
    /// owned by the embedding process.
    pub fn seed_metrics(&self, channel_id: i64, requests: u64, successes: u64, failures: u64) {
        self.metrics.seed(channel_id, requests, successes, failures);
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::channels::tests::test_channel;
    use chrono::TimeZone;

    fn service_with_policy(policy: AutoDisablePolicy) -> Arc<ChannelService> {
        let store = Arc::new(GatewayStore::open_in_memory().unwrap());
        ChannelService::new(store, Arc::new(policy))
    }

    fn failure(channel_id: i64, sec: i64, code: u16, key: Option<&str>) -> PerformanceRecord {
        PerformanceRecord {
            channel_id,
            api_key: key.map(|k| k.to_string()),
            end_time: Utc.timestamp_opt(sec, 0).unwrap(),
            success: false,
            canceled: false,
            request_completed: true,
            error_status_code: Some(code),
        }
    }

    fn success(channel_id: i64, sec: i64) -> PerformanceRecord {
        PerformanceRecord {
            success: true,
            error_status_code: None,
            ..failure(channel_id, sec, 0, None)
        }
    }

    #[test]
    fn selection_errors_when_no_channel_serves_the_model() {
        let service = service_with_policy(AutoDisablePolicy::default());
        service.create_channel(&test_channel("c1")).unwrap();
        let err = service
            .choose_channels(&InboundRequest {
                kind: RequestKind::Completion,
                model: "claude-3".into(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("no channel supports model 'claude-3'"));
    }

    #[test]
    fn selection_serves_from_the_cache_snapshot() {
        let service = service_with_policy(AutoDisablePolicy::default());
        service.create_channel(&test_channel("c1")).unwrap();
        let picked = service
            .choose_channels(&InboundRequest {
                kind: RequestKind::Completion,
                model: "gpt-4".into(),
            })
            .unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].channel.name, "c1");
        // The pick was counted before any outcome arrived.
        assert_eq!(
            service.metrics().get(picked[0].channel.id).unwrap().aggregated().requests,
            1
        );
    }

    #[test]
    fn unrecoverable_failure_disables_channel_and_refreshes_cache() {
        // No tokio runtime here, so the detached write runs inline and the
        // effect is observable immediately.
        let service = service_with_policy(AutoDisablePolicy::default());
        let ch = service.create_channel(&test_channel("c1")).unwrap();
        assert_eq!(service.cache().snapshot().len(), 1);

        service.record_outcome(&failure(ch.id, 1_700_000_000, 401, None));

        let stored = service.store().get_channel(ch.id).unwrap();
        assert_eq!(stored.status, ChannelStatus::Disabled);
        assert_eq!(stored.error_message.as_deref(), Some("Unauthorized"));
        assert!(service.cache().snapshot().is_empty());
    }

    #[test]
    fn threshold_failures_disable_channel() {
        let policy = AutoDisablePolicy {
            channel_threshold_per_code: 3,
            ..Default::default()
        };
        let service = service_with_policy(policy);
        let ch = service.create_channel(&test_channel("c1")).unwrap();

        for i in 0..2 {
            service.record_outcome(&failure(ch.id, 1_700_000_000 + i, 500, None));
        }
        assert_eq!(
            service.store().get_channel(ch.id).unwrap().status,
            ChannelStatus::Enabled
        );

        service.record_outcome(&failure(ch.id, 1_700_000_002, 500, None));
        let stored = service.store().get_channel(ch.id).unwrap();
        assert_eq!(stored.status, ChannelStatus::Disabled);
        assert_eq!(stored.error_message.as_deref(), Some("Internal Server Error"));
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let policy = AutoDisablePolicy {
            channel_threshold_per_code: 3,
            ..Default::default()
        };
        let service = service_with_policy(policy);
        let ch = service.create_channel(&test_channel("c1")).unwrap();

        service.record_outcome(&failure(ch.id, 1_700_000_000, 500, None));
        service.record_outcome(&failure(ch.id, 1_700_000_001, 500, None));
        service.record_outcome(&success(ch.id, 1_700_000_002));
        service.record_outcome(&failure(ch.id, 1_700_000_003, 500, None));
        service.record_outcome(&failure(ch.id, 1_700_000_004, 500, None));

        assert_eq!(
            service.store().get_channel(ch.id).unwrap().status,
            ChannelStatus::Enabled
        );
        assert_eq!(
            service.metrics().get(ch.id).unwrap().aggregated().consecutive_failures,
            2
        );
    }

    #[test]
    fn key_failures_rotate_before_disabling() {
        let policy = AutoDisablePolicy {
            key_threshold_per_code: 2,
            ..Default::default()
        };
        let service = service_with_policy(policy);
        let mut ch = test_channel("c1");
        ch.credentials = Credentials::ApiKeys(vec!["k1".into(), "k2".into()]);
        let created = service.create_channel(&ch).unwrap();

        service.record_outcome(&failure(created.id, 1_700_000_000, 500, Some("k1")));
        service.record_outcome(&failure(created.id, 1_700_000_001, 500, Some("k1")));

        let stored = service.store().get_channel(created.id).unwrap();
        assert_eq!(stored.status, ChannelStatus::Enabled);
        assert_eq!(stored.credentials.active_key(), Some("k2"));

        // Losing the last key disables the channel.
        service.record_outcome(&failure(created.id, 1_700_000_002, 403, Some("k2")));
        let stored = service.store().get_channel(created.id).unwrap();
        assert_eq!(stored.status, ChannelStatus::Disabled);
    }

    #[test]
    fn canceled_outcomes_touch_nothing_but_the_request_counter() {
        let service = service_with_policy(AutoDisablePolicy::default());
        let ch = service.create_channel(&test_channel("c1")).unwrap();
        service.metrics().record_selection(ch.id);
        service.record_outcome(&PerformanceRecord {
            canceled: true,
            ..failure(ch.id, 1_700_000_000, 0, None)
        });

        let agg = service.metrics().get(ch.id).unwrap().aggregated();
        assert_eq!(agg.requests, 0);
        assert_eq!(agg.failures, 0);
        assert_eq!(
            service.store().get_channel(ch.id).unwrap().status,
            ChannelStatus::Enabled
        );
    }

    #[test]
    fn failures_on_a_disabled_channel_accumulate_nothing() {
        let policy = AutoDisablePolicy {
            channel_threshold_per_code: 3,
            ..Default::default()
        };
        let service = service_with_policy(policy);
        let ch = service.create_channel(&test_channel("c1")).unwrap();
        service
            .store()
            .set_channel_status(ch.id, ChannelStatus::Disabled, Some("Unauthorized"))
            .unwrap();

        // Probing or replaying a disabled channel must not bump counters
        // or re-issue the disable write.
        for i in 0..2 {
            service.record_outcome(&failure(ch.id, 1_700_000_000 + i, 500, None));
        }
        let stored = service.store().get_channel(ch.id).unwrap();
        assert_eq!(stored.status, ChannelStatus::Disabled);
        assert_eq!(stored.error_message.as_deref(), Some("Unauthorized"));

        // Re-enabled, the streak starts from zero: one failure is not
        // three, so the channel stays up.
        let mut fixed = stored.clone();
        fixed.status = ChannelStatus::Enabled;
        service.update_channel(&fixed).unwrap();
        service.record_outcome(&failure(ch.id, 1_700_000_003, 500, None));
        assert_eq!(
            service.store().get_channel(ch.id).unwrap().status,
            ChannelStatus::Enabled
        );
    }

    #[test]
    fn outcomes_for_deleted_channels_skip_the_health_path() {
        let service = service_with_policy(AutoDisablePolicy::default());
        let ch = service.create_channel(&test_channel("c1")).unwrap();
        service.delete_channel(ch.id).unwrap();
        // An in-flight failure landing after the delete is dropped quietly.
        service.record_outcome(&failure(ch.id, 1_700_000_000, 401, None));
    }

    #[tokio::test]
    async fn async_queue_drains_in_order() {
        let service = service_with_policy(AutoDisablePolicy::default());
        let ch = service.create_channel(&test_channel("c1")).unwrap();
        service.start();

        for i in 0..3 {
            service.record_outcome_async(success(ch.id, 1_700_000_000 + i));
        }
        // Give the single consumer task a moment to drain FIFO.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let agg = service.metrics().get(ch.id).unwrap().aggregated();
        assert_eq!(agg.successes, 3);
    }

    #[test]
    fn admin_writes_refresh_the_snapshot() {
        let service = service_with_policy(AutoDisablePolicy::default());
        let ch = service.create_channel(&test_channel("c1")).unwrap();
        assert_eq!(service.cache().snapshot().len(), 1);

        service.delete_channel(ch.id).unwrap();
        assert!(service.cache().snapshot().is_empty());
    }
}
