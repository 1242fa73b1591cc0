use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use tgm_core::{
    config::Config,
    domain::{ChannelRef, MediaKind, Post, PostMedia},
    errors::Error,
    Result,
};

use crate::types::{
    ApiResponse, Chat, ChatMember, File, Message, ResponseParameters, Update, User, WebhookInfo,
};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

/// Transport port for the Bot API.
///
/// `call` is the generic JSON entry point (`/bot<token>/<method>`);
/// `file_url` builds the direct-download URL from a resolved `file_path`.
/// Tests supply a recording fake.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn call(&self, method: &str, params: Value) -> Result<Value>;
    fn file_url(&self, file_path: &str) -> String;
}

/// Production transport over reqwest.
pub struct HttpBotApi {
    token: String,
    http: reqwest::Client,
}

impl HttpBotApi {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        // Long polls can legitimately hold the connection open; keep the
        // transport timeout above the poll timeout.
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(45))
            .build()
            .map_err(|e| Error::Http(format!("http client build failed: {e}")))?;
        Ok(Self {
            token: token.into(),
            http,
        })
    }
}

#[async_trait]
impl BotApi for HttpBotApi {
    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let url = format!("{TELEGRAM_API_BASE}/bot{}/{method}", self.token);
        let resp = self
            .http
            .post(&url)
            .json(&params)
            .send()
            .await
            .map_err(|e| Error::Http(format!("telegram request error: {e}")))?;

        let status = resp.status();
        let body: ApiResponse<Value> = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("telegram response was not json ({status}): {e}")))?;

        if body.ok {
            return Ok(body.result.unwrap_or(Value::Null));
        }

        let description = body
            .description
            .unwrap_or_else(|| format!("telegram api returned {status}"));
        Err(map_api_error(body.error_code, description, body.parameters))
    }

    fn file_url(&self, file_path: &str) -> String {
        format!("{TELEGRAM_API_BASE}/file/bot{}/{file_path}", self.token)
    }
}

fn map_api_error(
    code: Option<i64>,
    description: String,
    parameters: Option<ResponseParameters>,
) -> Error {
    match code {
        Some(401) => Error::Unauthorized(description),
        Some(403) => Error::Forbidden(description),
        Some(404) => Error::NotFound(description),
        Some(409) => Error::WebhookConflict(description),
        Some(429) => Error::RateLimited {
            retry_after: parameters
                .and_then(|p| p.retry_after)
                .map(Duration::from_secs),
        },
        _ => Error::Api { code, description },
    }
}

/// Webhook (push) and long-polling (pull) delivery are mutually exclusive on
/// the Bot API: `getUpdates` is refused while a webhook is registered.
/// `TelegramClient::ensure_polling` enforces the transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeliveryMode {
    Polling,
    Webhook,
}

#[derive(Clone, Debug, Serialize)]
pub struct BotPermissions {
    pub status: String,
    pub is_admin: bool,
    pub can_post_messages: bool,
}

/// One filtered long-poll result: channel posts (media unresolved) with the
/// update id that delivered each, plus cursor bookkeeping.
#[derive(Debug, Default)]
pub struct ChannelBatch {
    pub posts: Vec<(Post, i64)>,
    pub last_update_id: Option<i64>,
    pub updates_seen: usize,
}

/// Typed wrapper over the Bot API methods relevant to reading one channel.
pub struct TelegramClient {
    api: Option<Arc<dyn BotApi>>,
    channel: Option<ChannelRef>,
    batch_size: u32,
    poll_timeout: Duration,
}

impl TelegramClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let api: Option<Arc<dyn BotApi>> = match &cfg.bot_token {
            Some(token) => Some(Arc::new(HttpBotApi::new(token.clone())?)),
            None => None,
        };
        let channel = cfg.channel.as_deref().and_then(ChannelRef::parse);
        Ok(Self {
            api,
            channel,
            batch_size: cfg.update_batch_size,
            poll_timeout: cfg.poll_timeout,
        })
    }

    /// Construct with an explicit transport (tests, alternate endpoints).
    pub fn with_api(api: Arc<dyn BotApi>, channel: ChannelRef) -> Self {
        Self {
            api: Some(api),
            channel: Some(channel),
            batch_size: 100,
            poll_timeout: Duration::from_secs(0),
        }
    }

    /// True iff both a bot token and a channel identifier are present.
    /// Every other method fails fast with a configuration error otherwise.
    pub fn is_configured(&self) -> bool {
        self.api.is_some() && self.channel.is_some()
    }

    fn parts(&self) -> Result<(&Arc<dyn BotApi>, &ChannelRef)> {
        match (&self.api, &self.channel) {
            (Some(api), Some(channel)) => Ok((api, channel)),
            _ => Err(Error::Config(
                "TELEGRAM_BOT_TOKEN and TELEGRAM_CHANNEL must both be set".to_string(),
            )),
        }
    }

    /// Generic typed call into the Bot API.
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T> {
        let (api, _) = self.parts()?;
        let result = api.call(method, params).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Two-step file resolution: `getFile` for the `file_path`, then the
    /// direct-download URL. Fails with `NotFound` for expired/invalid ids.
    pub async fn resolve_file_url(&self, file_id: &str) -> Result<String> {
        let (api, _) = self.parts()?;
        let file: File = self
            .call("getFile", json!({ "file_id": file_id }))
            .await?;
        let path = file.file_path.ok_or_else(|| {
            Error::NotFound(format!("file {file_id} has no file_path (expired?)"))
        })?;
        Ok(api.file_url(&path))
    }

    /// Tear down any active webhook so `getUpdates` is accepted. Returns the
    /// delivery mode that was active before the call.
    pub async fn ensure_polling(&self) -> Result<DeliveryMode> {
        let info: WebhookInfo = self.call("getWebhookInfo", json!({})).await?;
        if info.url.is_empty() {
            return Ok(DeliveryMode::Polling);
        }
        debug!("webhook registered at {}, deleting before polling", info.url);
        let _: bool = self.call("deleteWebhook", json!({})).await?;
        Ok(DeliveryMode::Webhook)
    }

    pub async fn get_webhook_info(&self) -> Result<WebhookInfo> {
        self.call("getWebhookInfo", json!({})).await
    }

    async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<Update>> {
        let mut params = json!({
            "limit": self.batch_size,
            "timeout": self.poll_timeout.as_secs(),
        });
        if let Some(offset) = offset {
            params["offset"] = json!(offset);
        }
        self.call("getUpdates", params).await
    }

    /// One sync step: enforce polling mode, long-poll from `offset`, and keep
    /// only posts published to the configured channel. Media is left
    /// unresolved so the caller can consult its URL cache first.
    pub async fn channel_updates(&self, offset: Option<i64>) -> Result<ChannelBatch> {
        let (_, channel) = self.parts()?;
        self.ensure_polling().await?;

        let updates = self.get_updates(offset).await?;
        let mut batch = ChannelBatch {
            updates_seen: updates.len(),
            ..Default::default()
        };

        for update in updates {
            batch.last_update_id = Some(
                batch
                    .last_update_id
                    .map_or(update.update_id, |m| m.max(update.update_id)),
            );
            let Some(msg) = update.channel_post else {
                continue;
            };
            if !channel.matches(msg.chat.id, msg.chat.username.as_deref()) {
                continue;
            }
            batch.posts.push((post_from_message(msg), update.update_id));
        }

        Ok(batch)
    }

    /// Pull the channel's most recent posts: poll, filter, sort by date
    /// descending, truncate to `limit`, then resolve attachments. A failed
    /// attachment resolution leaves that post's `file_url` empty; it never
    /// fails the batch.
    pub async fn get_channel_posts(&self, limit: usize, offset: Option<i64>) -> Result<Vec<Post>> {
        let batch = self.channel_updates(offset).await?;

        let mut posts: Vec<Post> = batch.posts.into_iter().map(|(p, _)| p).collect();
        posts.sort_by(|a, b| b.date.cmp(&a.date).then(b.message_id.cmp(&a.message_id)));
        posts.truncate(limit);

        for post in &mut posts {
            self.resolve_post_media(post).await;
        }

        Ok(posts)
    }

    /// Best-effort attachment resolution for one post.
    pub async fn resolve_post_media(&self, post: &mut Post) {
        let Some(media) = &mut post.media else {
            return;
        };
        match self.resolve_file_url(&media.file_id).await {
            Ok(url) => media.file_url = Some(url),
            Err(e) => {
                warn!(
                    "failed to resolve media for message {}: {e}",
                    post.message_id
                );
            }
        }
    }

    // Diagnostics. Each call is independently failable; callers treat a
    // failure as an absent field, never as a failed response.

    pub async fn get_channel_info(&self) -> Result<Chat> {
        let (_, channel) = self.parts()?;
        self.call("getChat", json!({ "chat_id": chat_id_value(channel) }))
            .await
    }

    pub async fn get_chat_administrators(&self) -> Result<Vec<ChatMember>> {
        let (_, channel) = self.parts()?;
        self.call(
            "getChatAdministrators",
            json!({ "chat_id": chat_id_value(channel) }),
        )
        .await
    }

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", json!({})).await
    }

    pub async fn check_bot_permissions(&self) -> Result<BotPermissions> {
        let (_, channel) = self.parts()?;
        let me = self.get_me().await?;
        let member: ChatMember = self
            .call(
                "getChatMember",
                json!({ "chat_id": chat_id_value(channel), "user_id": me.id }),
            )
            .await?;
        let is_admin = matches!(member.status.as_str(), "administrator" | "creator");
        Ok(BotPermissions {
            can_post_messages: member.can_post_messages.unwrap_or(is_admin),
            status: member.status,
            is_admin,
        })
    }
}

fn chat_id_value(channel: &ChannelRef) -> Value {
    match channel {
        ChannelRef::Username(name) => Value::String(format!("@{name}")),
        ChannelRef::Id(id) => json!(id),
    }
}

/// Convert a wire message into a mirrored post. Exactly one attachment is
/// kept; photos keep only the highest-resolution variant.
pub fn post_from_message(msg: Message) -> Post {
    let media = best_media(&msg);
    Post {
        message_id: msg.message_id,
        date: msg.date,
        text: msg.text,
        caption: msg.caption,
        media,
        views: msg.views,
        forwards: msg.forwards,
    }
}

fn best_media(msg: &Message) -> Option<PostMedia> {
    if let Some(photos) = &msg.photo {
        let best = photos
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
        return Some(media(MediaKind::Photo, &best.file_id));
    }
    if let Some(v) = &msg.video {
        return Some(media(MediaKind::Video, &v.file_id));
    }
    if let Some(d) = &msg.document {
        return Some(media(MediaKind::Document, &d.file_id));
    }
    if let Some(s) = &msg.sticker {
        return Some(media(MediaKind::Sticker, &s.file_id));
    }
    if let Some(a) = &msg.audio {
        return Some(media(MediaKind::Audio, &a.file_id));
    }
    if let Some(v) = &msg.voice {
        return Some(media(MediaKind::Voice, &v.file_id));
    }
    None
}

fn media(kind: MediaKind, file_id: &str) -> PostMedia {
    PostMedia {
        kind,
        file_id: file_id.to_string(),
        file_url: None,
    }
}
