use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Hard cap for the posts list endpoint; requested limits are clamped to it.
pub const MAX_PAGE_SIZE: usize = 50;

/// Typed configuration for the mirror service.
///
/// Provider credentials are optional at load time: the HTTP server starts
/// without them and surfaces a configuration error per request instead, so a
/// misconfigured deploy still answers with stored posts.
#[derive(Clone, Debug)]
pub struct Config {
    // Provider
    pub bot_token: Option<String>,
    pub channel: Option<String>,
    pub webhook_secret: Option<String>,

    // Server
    pub bind_addr: SocketAddr,
    pub store_path: PathBuf,
    pub sync_interval: Duration,
    pub poll_timeout: Duration,
    pub update_batch_size: u32,
    pub default_page_size: usize,

    // Caches
    pub posts_cache_ttl: Duration,
    pub media_cache_ttl: Duration,
    pub channel_cache_ttl: Duration,
    pub cache_max_entries: usize,

    // Rate limiting
    pub rate_limit_requests: u32,
    pub rate_limit_interval: Duration,
    pub rate_limit_max_windows: usize,

    // Feed (client-side reader)
    pub feed_dir: PathBuf,
    pub feed_refresh_interval: Duration,
    pub feed_cache_ttl: Duration,
    pub feed_storage_ttl: Duration,
    pub feed_max_retries: u32,
    pub feed_retry_base_delay: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let bot_token = env_str("TELEGRAM_BOT_TOKEN").and_then(non_empty);
        let channel = env_str("TELEGRAM_CHANNEL").and_then(non_empty);
        let webhook_secret = env_str("TELEGRAM_WEBHOOK_SECRET").and_then(non_empty);

        let bind_addr = env_str("TGM_BIND_ADDR")
            .unwrap_or_else(|| "127.0.0.1:8080".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("TGM_BIND_ADDR is not a socket address: {e}")))?;

        let store_path =
            PathBuf::from(env_str("TGM_STORE_PATH").unwrap_or("/tmp/tgm-posts.json".to_string()));
        let feed_dir = PathBuf::from(env_str("TGM_FEED_DIR").unwrap_or("/tmp/tgm-feed".to_string()));

        let sync_interval = Duration::from_secs(env_u64("TGM_SYNC_INTERVAL_SECS").unwrap_or(300));
        let poll_timeout = Duration::from_secs(env_u64("TGM_POLL_TIMEOUT_SECS").unwrap_or(10));
        let update_batch_size = env_u32("TGM_UPDATE_BATCH_SIZE").unwrap_or(100).clamp(1, 100);
        let default_page_size = env_usize("TGM_DEFAULT_PAGE_SIZE")
            .unwrap_or(20)
            .clamp(1, MAX_PAGE_SIZE);

        let posts_cache_ttl =
            Duration::from_secs(env_u64("TGM_POSTS_CACHE_TTL_SECS").unwrap_or(120));
        let media_cache_ttl =
            Duration::from_secs(env_u64("TGM_MEDIA_CACHE_TTL_SECS").unwrap_or(3300));
        let channel_cache_ttl =
            Duration::from_secs(env_u64("TGM_CHANNEL_CACHE_TTL_SECS").unwrap_or(600));
        let cache_max_entries = env_usize("TGM_CACHE_MAX_ENTRIES").unwrap_or(500);

        let rate_limit_requests = env_u32("RATE_LIMIT_REQUESTS").unwrap_or(30);
        let rate_limit_interval =
            Duration::from_secs(env_u64("RATE_LIMIT_WINDOW_SECS").unwrap_or(60));
        let rate_limit_max_windows = env_usize("RATE_LIMIT_MAX_WINDOWS").unwrap_or(10_000);

        let feed_refresh_interval =
            Duration::from_secs(env_u64("TGM_FEED_REFRESH_SECS").unwrap_or(300));
        let feed_cache_ttl = Duration::from_secs(env_u64("TGM_FEED_CACHE_TTL_SECS").unwrap_or(120));
        let feed_storage_ttl =
            Duration::from_secs(env_u64("TGM_FEED_STORAGE_TTL_SECS").unwrap_or(3600));
        let feed_max_retries = env_u32("TGM_FEED_MAX_RETRIES").unwrap_or(3);
        let feed_retry_base_delay =
            Duration::from_millis(env_u64("TGM_FEED_RETRY_BASE_MS").unwrap_or(1000));

        Ok(Self {
            bot_token,
            channel,
            webhook_secret,
            bind_addr,
            store_path,
            sync_interval,
            poll_timeout,
            update_batch_size,
            default_page_size,
            posts_cache_ttl,
            media_cache_ttl,
            channel_cache_ttl,
            cache_max_entries,
            rate_limit_requests,
            rate_limit_interval,
            rate_limit_max_windows,
            feed_dir,
            feed_refresh_interval,
            feed_cache_ttl,
            feed_storage_ttl,
            feed_max_retries,
            feed_retry_base_delay,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
