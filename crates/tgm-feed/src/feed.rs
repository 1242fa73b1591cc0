use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use tgm_core::{cache::Cache, domain::Post, errors::Error, Result};

use crate::storage::FeedStorage;

/// What one read of the posts endpoint yields.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PostsPayload {
    pub posts: Vec<Post>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_info: Option<Value>,
}

/// Network port for the feed. Implementations must return `Error::Cancelled`
/// (and nothing else) when the supplied token fires mid-request.
#[async_trait]
pub trait PostsApi: Send + Sync {
    async fn fetch_posts(&self, cancel: &CancellationToken) -> Result<PostsPayload>;
}

/// Production transport: reads the mirror's posts endpoint.
pub struct HttpPostsApi {
    base_url: String,
    http: reqwest::Client,
}

impl HttpPostsApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Http(format!("http client build failed: {e}")))?;
        Ok(Self {
            base_url: base_url.into(),
            http,
        })
    }
}

#[async_trait]
impl PostsApi for HttpPostsApi {
    async fn fetch_posts(&self, cancel: &CancellationToken) -> Result<PostsPayload> {
        #[derive(Deserialize)]
        struct Wire {
            success: bool,
            #[serde(default)]
            posts: Vec<Post>,
            #[serde(default)]
            meta: Option<WireMeta>,
        }
        #[derive(Default, Deserialize)]
        struct WireMeta {
            #[serde(default)]
            channel_info: Option<Value>,
        }

        let request = self
            .http
            .get(format!("{}/api/telegram/posts", self.base_url))
            .send();
        let resp = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            r = request => r.map_err(|e| Error::Http(format!("posts request error: {e}")))?,
        };

        if !resp.status().is_success() {
            return Err(Error::Http(format!(
                "posts endpoint returned {}",
                resp.status()
            )));
        }
        let wire: Wire = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("posts response was not json: {e}")))?;
        if !wire.success {
            return Err(Error::Http("posts endpoint reported failure".to_string()));
        }
        Ok(PostsPayload {
            posts: wire.posts,
            channel_info: wire.meta.and_then(|m| m.channel_info),
        })
    }
}

#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Prefix for the persisted storage keys (`<key>-data`,
    /// `<key>-channel-info`, `<key>-last-update`).
    pub cache_key: String,
    pub cache_ttl: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub refresh_interval: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            cache_key: "telegram-posts".to_string(),
            cache_ttl: Duration::from_secs(120),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(300),
        }
    }
}

/// Feed state as the UI sees it. Mutated only through the feed's
/// fetch/refresh/clear operations.
#[derive(Clone, Debug)]
pub struct FeedState {
    pub posts: Vec<Post>,
    pub loading: bool,
    pub error: Option<String>,
    /// Unix millis of the last successful fetch.
    pub last_update_time: Option<i64>,
    pub is_refreshing: bool,
    pub retry_count: u32,
}

impl FeedState {
    fn empty() -> Self {
        Self {
            posts: Vec::new(),
            loading: true,
            error: None,
            last_update_time: None,
            is_refreshing: false,
            retry_count: 0,
        }
    }
}

/// Polling posts reader over three sources of truth: the in-memory cache,
/// persisted storage, and the network.
///
/// Construction seeds state from persisted storage, so previously fetched
/// posts are visible immediately while a refresh proceeds. Any new fetch
/// cancels the previous in-flight one; a failed fetch retries with doubling
/// backoff up to `max_retries`, then surfaces the error while the last known
/// good posts stay displayed.
pub struct PostsFeed {
    api: Arc<dyn PostsApi>,
    cfg: FeedConfig,
    cache: Mutex<Cache<String, PostsPayload>>,
    storage: FeedStorage,
    state: Mutex<FeedState>,
    inflight: Mutex<Option<CancellationToken>>,
}

impl PostsFeed {
    pub fn new(api: Arc<dyn PostsApi>, storage: FeedStorage, cfg: FeedConfig) -> Self {
        let persisted: Option<Vec<Post>> = storage.load(&format!("{}-data", cfg.cache_key));
        let last_update: Option<i64> = storage.load(&format!("{}-last-update", cfg.cache_key));

        let state = match persisted {
            Some(posts) => FeedState {
                posts,
                loading: false,
                last_update_time: last_update,
                ..FeedState::empty()
            },
            None => FeedState::empty(),
        };

        Self {
            api,
            cache: Mutex::new(Cache::new(cfg.cache_ttl, 16)),
            storage,
            state: Mutex::new(state),
            inflight: Mutex::new(None),
            cfg,
        }
    }

    pub async fn state(&self) -> FeedState {
        self.state.lock().await.clone()
    }

    fn data_key(&self) -> String {
        format!("{}-data", self.cfg.cache_key)
    }

    fn channel_key(&self) -> String {
        format!("{}-channel-info", self.cfg.cache_key)
    }

    fn last_update_key(&self) -> String {
        format!("{}-last-update", self.cfg.cache_key)
    }

    /// Fetch posts. A manual refresh always goes to the network; an automatic
    /// one is answered from the in-memory cache when it can be.
    pub async fn fetch_posts(&self, manual: bool) {
        let token = {
            let mut inflight = self.inflight.lock().await;
            if let Some(prev) = inflight.take() {
                prev.cancel();
            }
            let token = CancellationToken::new();
            *inflight = Some(token.clone());
            token
        };

        if !manual {
            let cached = { self.cache.lock().await.get(self.data_key().as_str()) };
            if let Some(payload) = cached {
                debug!("serving posts from memory cache");
                let mut st = self.state.lock().await;
                st.posts = payload.posts;
                st.loading = false;
                st.is_refreshing = false;
                st.error = None;
                return;
            }
        }

        {
            let mut st = self.state.lock().await;
            if st.posts.is_empty() {
                st.loading = true;
            } else {
                st.is_refreshing = true;
            }
        }

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.api.fetch_posts(&token).await {
                Ok(payload) => {
                    self.apply_success(payload).await;
                    return;
                }
                Err(Error::Cancelled) => {
                    debug!("fetch superseded, dropping result");
                    return;
                }
                Err(e) if attempt < self.cfg.max_retries && !token.is_cancelled() => {
                    {
                        self.state.lock().await.retry_count = attempt;
                    }
                    let delay = self.cfg.retry_base_delay * 2u32.saturating_pow(attempt - 1);
                    debug!("fetch attempt {attempt} failed ({e}), retrying in {delay:?}");
                    tokio::select! {
                        _ = token.cancelled() => return,
                        _ = sleep(delay) => {}
                    }
                }
                Err(e) => {
                    warn!("posts fetch failed after {attempt} attempts: {e}");
                    let mut st = self.state.lock().await;
                    st.error = Some(e.to_string());
                    st.retry_count = attempt;
                    st.loading = false;
                    st.is_refreshing = false;
                    // Last known good posts stay visible.
                    return;
                }
            }
        }
    }

    /// Manual trigger: drop the cached entry, then force a network fetch.
    pub async fn refresh_posts(&self) {
        self.cache.lock().await.remove(self.data_key().as_str());
        self.fetch_posts(true).await;
    }

    /// Wipe memory cache, persisted storage, and state.
    pub async fn clear_data(&self) {
        if let Some(prev) = self.inflight.lock().await.take() {
            prev.cancel();
        }
        self.cache.lock().await.clear();
        if let Err(e) = self.storage.clear() {
            warn!("failed to clear persisted feed storage: {e}");
        }
        *self.state.lock().await = FeedState::empty();
    }

    /// Run the auto-refresh loop until the returned token is cancelled. The
    /// first tick fires immediately; subsequent fetches share the same
    /// supersession point as manual refreshes.
    pub fn spawn_auto_refresh(self: &Arc<Self>) -> CancellationToken {
        let stop = CancellationToken::new();
        let feed = Arc::clone(self);
        let stop_loop = stop.clone();
        tokio::spawn(async move {
            let mut ticker = interval(feed.cfg.refresh_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = stop_loop.cancelled() => return,
                    _ = ticker.tick() => feed.fetch_posts(false).await,
                }
            }
        });
        stop
    }

    async fn apply_success(&self, payload: PostsPayload) {
        let now = Utc::now().timestamp_millis();

        self.cache
            .lock()
            .await
            .set(self.data_key(), payload.clone());
        if let Err(e) = self.storage.save(&self.data_key(), &payload.posts) {
            warn!("failed to persist posts: {e}");
        }
        if let Some(info) = &payload.channel_info {
            if let Err(e) = self.storage.save(&self.channel_key(), info) {
                warn!("failed to persist channel info: {e}");
            }
        }
        if let Err(e) = self.storage.save(&self.last_update_key(), &now) {
            warn!("failed to persist last-update stamp: {e}");
        }

        let mut st = self.state.lock().await;
        st.posts = payload.posts;
        st.loading = false;
        st.is_refreshing = false;
        st.error = None;
        st.retry_count = 0;
        st.last_update_time = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"))
    }

    fn storage(prefix: &str) -> FeedStorage {
        FeedStorage::open(tmp_dir(prefix), Duration::from_secs(3600)).unwrap()
    }

    fn fast_config() -> FeedConfig {
        FeedConfig {
            retry_base_delay: Duration::from_millis(100),
            ..FeedConfig::default()
        }
    }

    fn post(message_id: i64, text: &str) -> Post {
        Post {
            message_id,
            date: message_id * 100,
            text: Some(text.to_string()),
            caption: None,
            media: None,
            views: None,
            forwards: None,
        }
    }

    fn payload(posts: Vec<Post>) -> PostsPayload {
        PostsPayload {
            posts,
            channel_info: None,
        }
    }

    struct CountingApi {
        calls: AtomicU32,
    }

    impl CountingApi {
        fn new() -> Self {
            Self {
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl PostsApi for CountingApi {
        async fn fetch_posts(&self, _cancel: &CancellationToken) -> Result<PostsPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(payload(vec![post(1, "hello")]))
        }
    }

    struct FailingApi {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PostsApi for FailingApi {
        async fn fetch_posts(&self, _cancel: &CancellationToken) -> Result<PostsPayload> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::Http("connection refused".to_string()))
        }
    }

    /// First call parks until cancelled; later calls succeed.
    struct SupersededApi {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PostsApi for SupersededApi {
        async fn fetch_posts(&self, cancel: &CancellationToken) -> Result<PostsPayload> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                cancel.cancelled().await;
                return Err(Error::Cancelled);
            }
            Ok(payload(vec![post(2, "fresh")]))
        }
    }

    #[tokio::test]
    async fn seeds_from_persisted_storage() {
        let storage = storage("tgm-feed-seed");
        storage
            .save("telegram-posts-data", &vec![post(1, "persisted")])
            .unwrap();
        storage.save("telegram-posts-last-update", &12345i64).unwrap();

        let feed = PostsFeed::new(
            Arc::new(CountingApi::new()),
            storage,
            FeedConfig::default(),
        );

        let st = feed.state().await;
        assert!(!st.loading);
        assert_eq!(st.posts.len(), 1);
        assert_eq!(st.posts[0].text.as_deref(), Some("persisted"));
        assert_eq!(st.last_update_time, Some(12345));
    }

    #[tokio::test]
    async fn empty_storage_starts_loading() {
        let feed = PostsFeed::new(
            Arc::new(CountingApi::new()),
            storage("tgm-feed-empty"),
            FeedConfig::default(),
        );
        let st = feed.state().await;
        assert!(st.loading);
        assert!(st.posts.is_empty());
    }

    #[tokio::test]
    async fn auto_fetch_is_answered_from_cache_manual_is_not() {
        let api = Arc::new(CountingApi::new());
        let feed = PostsFeed::new(api.clone(), storage("tgm-feed-cache"), FeedConfig::default());

        feed.fetch_posts(false).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        // Cache hit: no network.
        feed.fetch_posts(false).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 1);

        // Manual refresh always goes to the network.
        feed.refresh_posts().await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_three_times_with_doubling_delay_then_surfaces_error() {
        let api = Arc::new(FailingApi {
            calls: AtomicU32::new(0),
        });
        let storage = storage("tgm-feed-retry");
        storage
            .save("telegram-posts-data", &vec![post(1, "stale")])
            .unwrap();
        let feed = PostsFeed::new(api.clone(), storage, fast_config());

        let started = tokio::time::Instant::now();
        feed.fetch_posts(false).await;

        // Exactly 3 attempts; delays of 100ms and 200ms between them.
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));

        let st = feed.state().await;
        assert_eq!(st.retry_count, 3);
        assert!(st.error.as_deref().unwrap().contains("connection refused"));
        assert!(!st.loading);
        assert!(!st.is_refreshing);
        // Stale posts are retained, never cleared on failure.
        assert_eq!(st.posts.len(), 1);
        assert_eq!(st.posts[0].text.as_deref(), Some("stale"));
    }

    #[tokio::test(start_paused = true)]
    async fn new_fetch_supersedes_the_inflight_one() {
        let api = Arc::new(SupersededApi {
            calls: AtomicU32::new(0),
        });
        let feed = Arc::new(PostsFeed::new(
            api.clone(),
            storage("tgm-feed-supersede"),
            fast_config(),
        ));

        let first = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.fetch_posts(false).await })
        };
        // Let the first fetch park inside the transport.
        tokio::task::yield_now().await;

        feed.fetch_posts(true).await;
        first.await.unwrap();

        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
        let st = feed.state().await;
        // The superseded attempt left no error behind.
        assert!(st.error.is_none());
        assert_eq!(st.posts[0].text.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn successful_fetch_persists_and_stamps() {
        let api = Arc::new(CountingApi::new());
        let storage = storage("tgm-feed-persist");
        let feed = PostsFeed::new(api, storage.clone(), FeedConfig::default());

        feed.fetch_posts(false).await;

        let st = feed.state().await;
        assert!(st.last_update_time.is_some());
        let persisted: Option<Vec<Post>> = storage.load("telegram-posts-data");
        assert_eq!(persisted.unwrap()[0].text.as_deref(), Some("hello"));
        let stamped: Option<i64> = storage.load("telegram-posts-last-update");
        assert_eq!(stamped, st.last_update_time);
    }

    #[tokio::test]
    async fn clear_data_wipes_every_layer() {
        let api = Arc::new(CountingApi::new());
        let storage = storage("tgm-feed-clear");
        let feed = PostsFeed::new(api.clone(), storage.clone(), FeedConfig::default());

        feed.fetch_posts(false).await;
        feed.clear_data().await;

        let st = feed.state().await;
        assert!(st.posts.is_empty());
        assert!(st.loading);
        assert_eq!(st.last_update_time, None);
        assert_eq!(storage.load::<Vec<Post>>("telegram-posts-data"), None);

        // Next automatic fetch cannot be a cache hit.
        feed.fetch_posts(false).await;
        assert_eq!(api.calls.load(Ordering::SeqCst), 2);
    }
}
