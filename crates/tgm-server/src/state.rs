use std::sync::Arc;

use axum::http::HeaderMap;
use tokio::sync::Mutex;

use tgm_core::{
    cache::Cache, config::Config, domain::Post, ratelimit::RateLimiter, store::PostStore, Result,
};
use tgm_telegram::{types::Chat, TelegramClient};

/// Shared per-process state, explicitly constructed and injected — the caches
/// live here rather than in module globals so handlers and tests decide what
/// they share.
pub struct AppState {
    pub cfg: Arc<Config>,
    pub client: Arc<TelegramClient>,
    pub store: Mutex<PostStore>,
    pub posts_cache: Mutex<Cache<String, Vec<Post>>>,
    pub media_cache: Mutex<Cache<String, String>>,
    pub channel_cache: Mutex<Cache<String, Chat>>,
    pub limiter: Mutex<RateLimiter>,
}

impl AppState {
    pub fn new(cfg: Arc<Config>, client: Arc<TelegramClient>, store: PostStore) -> Self {
        Self {
            client,
            store: Mutex::new(store),
            posts_cache: Mutex::new(Cache::new(cfg.posts_cache_ttl, cfg.cache_max_entries)),
            media_cache: Mutex::new(Cache::new(cfg.media_cache_ttl, cfg.cache_max_entries)),
            channel_cache: Mutex::new(Cache::new(cfg.channel_cache_ttl, cfg.cache_max_entries)),
            limiter: Mutex::new(RateLimiter::new(
                cfg.rate_limit_interval,
                cfg.rate_limit_max_windows,
            )),
            cfg,
        }
    }

    /// Apply the local fixed-window limiter for this caller.
    pub async fn check_rate(&self, headers: &HeaderMap) -> Result<()> {
        let token = client_token(headers);
        self.limiter
            .lock()
            .await
            .check(&token, self.cfg.rate_limit_requests)
    }
}

/// Rate-limit key for a request: first forwarded address when present,
/// otherwise a shared anonymous bucket.
fn client_token(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "anonymous".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_token_prefers_first_forwarded_address() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1, 10.0.0.2".parse().unwrap());
        assert_eq!(client_token(&headers), "10.0.0.1");

        assert_eq!(client_token(&HeaderMap::new()), "anonymous");
    }
}
