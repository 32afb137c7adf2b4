// Modelgate Engine — Channel Cache
// Read-mostly cache of enabled channels, rebuilt eagerly on write and
// periodically on poll. The reloader builds a fresh snapshot off-path and
// publishes it with a pointer swap; readers keep their Arc for the length
// of one selection, so a reload never exposes partial state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use parking_lot::{Mutex, RwLock};

use crate::atoms::constants::{CACHE_RELOAD_DEADLINE_SECS, CACHE_RELOAD_INTERVAL_SECS};
use crate::atoms::error::GatewayResult;
use crate::engine::http::client_with_proxy;
use crate::engine::model_entry::{self, ModelEntryTable};
use crate::engine::providers::AnyTransformer;
use crate::engine::store::GatewayStore;
use crate::engine::types::*;

// ── Live channel ───────────────────────────────────────────────────────────

/// The in-memory, enriched view of one enabled channel: outbound
/// transformer, HTTP executor, and the precomputed lookup tables. Created
/// on cache (re)load, destroyed when the next reload excludes it.
pub struct LiveChannel {
    pub channel: Channel,
    pub transformer: AnyTransformer,
    pub http: reqwest::Client,
    pub model_entries: ModelEntryTable,
    pub override_headers: Vec<HeaderOverride>,
    pub override_parameters: serde_json::Value,
    pub prices: HashMap<String, ChannelModelPrice>,
}

impl std::fmt::Debug for LiveChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveChannel")
            .field("channel", &self.channel)
            .field("transformer", &self.transformer.channel_type())
            .field("http", &self.http)
            .field("model_entries", &self.model_entries)
            .field("override_headers", &self.override_headers)
            .field("override_parameters", &self.override_parameters)
            .field("prices", &self.prices)
            .finish()
    }
}

impl LiveChannel {
    pub fn build(channel: Channel, prices: Vec<ChannelModelPrice>) -> GatewayResult<Self> {
        let transformer = AnyTransformer::from_channel(
            channel.channel_type,
            &channel.effective_base_url(),
            &channel.credentials,
        )?;
        let http = client_with_proxy(&channel.settings.proxy)?;
        let model_entries = model_entry::build_for_channel(&channel);

        let raw = channel.settings.override_parameters.trim();
        let override_parameters: serde_json::Value = if raw.is_empty() {
            serde_json::Value::Object(Default::default())
        } else {
            serde_json::from_str(raw)?
        };
        let override_headers = channel.settings.override_headers.clone();
        let prices = prices
            .into_iter()
            .map(|p| (p.model_id.clone(), p))
            .collect();

        Ok(LiveChannel {
            channel,
            transformer,
            http,
            model_entries,
            override_headers,
            override_parameters,
            prices,
        })
    }

    pub fn is_model_supported(&self, request_model: &str) -> bool {
        model_entry::is_model_supported(&self.model_entries, request_model)
    }

    /// The upstream model name this channel serves `request_model` as.
    pub fn choose_model(&self, request_model: &str) -> GatewayResult<&str> {
        model_entry::choose_model(&self.model_entries, request_model)
    }

    pub fn price_for(&self, model_id: &str) -> Option<&ChannelModelPrice> {
        self.prices.get(model_id)
    }
}

// ── Cache ──────────────────────────────────────────────────────────────────

pub type Snapshot = Arc<Vec<Arc<LiveChannel>>>;

pub struct ChannelCache {
    store: Arc<GatewayStore>,
    /// Current snapshot, replaced atomically by the reloader.
    snapshot: RwLock<Snapshot>,
    /// Greatest channel `updated_at` observed by the last successful load.
    latest_update: Mutex<Option<String>>,
}

impl ChannelCache {
    pub fn new(store: Arc<GatewayStore>) -> Self {
        ChannelCache {
            store,
            snapshot: RwLock::new(Arc::new(Vec::new())),
            latest_update: Mutex::new(None),
        }
    }

    /// The current enabled-channel list. Hold the returned Arc for the
    /// duration of one selection; do not re-fetch mid-operation.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.read().clone()
    }

    /// Forget the reload cursor so the next load rebuilds unconditionally.
    /// Local mutations call this before their reload — the cursor has
    /// millisecond resolution and a same-instant write must not be missed.
    pub fn invalidate(&self) {
        *self.latest_update.lock() = None;
    }

    /// Run the load procedure. Returns false on the cheap early exit (no
    /// channel row newer than the last observed cursor).
    pub fn load(&self) -> GatewayResult<bool> {
        let cursor = self.store.max_channel_updated_at()?;
        {
            let latest = self.latest_update.lock();
            if let (Some(cursor), Some(latest)) = (&cursor, &*latest) {
                if cursor <= latest {
                    return Ok(false);
                }
            }
        }

        let rows = self.store.list_enabled_channels()?;
        let mut lives: Vec<Arc<LiveChannel>> = Vec::with_capacity(rows.len());
        for channel in rows {
            let id = channel.id;
            let name = channel.name.clone();
            let prices = self.store.list_channel_prices(id).unwrap_or_default();
            match LiveChannel::build(channel, prices) {
                Ok(live) => lives.push(Arc::new(live)),
                // One bad row must not abort the whole reload.
                Err(e) => warn!("[cache] skipping channel '{}' (id {}): {}", name, id, e),
            }
        }

        info!("[cache] Loaded {} enabled channel(s)", lives.len());
        *self.snapshot.write() = Arc::new(lives);
        *self.latest_update.lock() = cursor;
        Ok(true)
    }

    /// Periodic reload task. Transient store failures keep the prior
    /// snapshot serving.
    pub fn spawn_periodic(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval(Duration::from_secs(CACHE_RELOAD_INTERVAL_SECS));
            ticker.tick().await; // first tick fires immediately
            loop {
                ticker.tick().await;
                let c = Arc::clone(&cache);
                match tokio::task::spawn_blocking(move || c.load()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!("[cache] periodic reload failed: {} — keeping prior snapshot", e)
                    }
                    Err(e) => warn!("[cache] periodic reload panicked: {}", e),
                }
            }
        })
    }

    /// Best-effort reload after a local mutation: 10-second deadline,
    /// panics recovered, failures logged.
    pub fn schedule_reload(self: &Arc<Self>) {
        self.invalidate();
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let work = tokio::task::spawn_blocking(move || cache.load());
            match tokio::time::timeout(Duration::from_secs(CACHE_RELOAD_DEADLINE_SECS), work)
                .await
            {
                Err(_) => warn!("[cache] async reload missed its deadline"),
                Ok(Err(e)) => warn!("[cache] async reload panicked: {}", e),
                Ok(Ok(Err(e))) => warn!("[cache] async reload failed: {}", e),
                Ok(Ok(Ok(_))) => {}
            }
        });
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(name: &str, weight: i64, models: &[&str]) -> Channel {
        Channel {
            id: 0,
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
        }
    }

    fn cache_with_store() -> (Arc<GatewayStore>, ChannelCache) {
        let store = Arc::new(GatewayStore::open_in_memory().unwrap());
        let cache = ChannelCache::new(store.clone());
        (store, cache)
    }

    #[test]
    fn load_publishes_enabled_channels_in_weight_order() {
        let (store, cache) = cache_with_store();
        store.create_channel(&channel("low", 1, &["gpt-4"])).unwrap();
        store.create_channel(&channel("high", 9, &["gpt-4"])).unwrap();
        let mut off = channel("off", 99, &["gpt-4"]);
        off.status = ChannelStatus::Disabled;
        store.create_channel(&off).unwrap();

        assert!(cache.load().unwrap());
        let snap = cache.snapshot();
        let names: Vec<_> = snap.iter().map(|l| l.channel.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);
    }

    #[test]
    fn reload_without_newer_rows_is_a_noop() {
        let (store, cache) = cache_with_store();
        store.create_channel(&channel("c1", 1, &["gpt-4"])).unwrap();
        assert!(cache.load().unwrap());
        assert!(!cache.load().unwrap());

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create_channel(&channel("c2", 2, &["gpt-4"])).unwrap();
        assert!(cache.load().unwrap());
        assert_eq!(cache.snapshot().len(), 2);
    }

    #[test]
    fn broken_channel_is_skipped_not_fatal() {
        let (store, cache) = cache_with_store();
        store.create_channel(&channel("good", 1, &["gpt-4"])).unwrap();
        // An empty key list passes shape validation but has no usable key,
        // so transformer construction fails for this row only.
        let mut bad = channel("bad", 9, &["gpt-4"]);
        bad.credentials = Credentials::ApiKeys(vec![]);
        store.create_channel(&bad).unwrap();

        assert!(cache.load().unwrap());
        let snap = cache.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].channel.name, "good");
    }

    #[test]
    fn live_channel_precomputes_lookup_tables() {
        let (store, cache) = cache_with_store();
        let mut ch = channel("c1", 1, &["openai/gpt-4"]);
        ch.settings.auto_trimmed_model_prefixes = vec!["openai".into()];
        ch.settings.override_parameters = r#"{"temperature":0.2}"#.into();
        ch.settings.override_headers = vec![HeaderOverride {
            key: "X-Org".into(),
            value: "acme".into(),
        }];
        let created = store.create_channel(&ch).unwrap();
        store
            .set_channel_model_price(
                created.id,
                "openai/gpt-4",
                ModelPrice { input: 2.5, output: 10.0 },
                None,
            )
            .unwrap();

        cache.load().unwrap();
        let snap = cache.snapshot();
        let live = &snap[0];
        assert!(live.is_model_supported("gpt-4"));
        assert_eq!(live.choose_model("gpt-4").unwrap(), "openai/gpt-4");
        assert_eq!(live.override_parameters["temperature"], 0.2);
        assert_eq!(live.override_headers.len(), 1);
        assert!(live.price_for("openai/gpt-4").is_some());
    }

    #[test]
    fn readers_keep_their_snapshot_across_reloads() {
        let (store, cache) = cache_with_store();
        store.create_channel(&channel("c1", 1, &["gpt-4"])).unwrap();
        cache.load().unwrap();
        let held = cache.snapshot();

        std::thread::sleep(std::time::Duration::from_millis(5));
        store.create_channel(&channel("c2", 2, &["gpt-4"])).unwrap();
        cache.load().unwrap();

        assert_eq!(held.len(), 1);
        assert_eq!(cache.snapshot().len(), 2);
    }
}
