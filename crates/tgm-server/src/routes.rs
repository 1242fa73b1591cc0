use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, warn};

use tgm_core::{
    config::MAX_PAGE_SIZE,
    domain::{ChannelRef, Post},
    errors::Error,
    Result,
};
use tgm_telegram::{post_from_message, types::Chat, types::Update, BotPermissions};

use crate::{
    state::AppState,
    sync::{run_sync, SyncReport},
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/telegram/posts", get(list_posts))
        .route("/api/telegram/fetch", get(fetch_posts))
        .route("/api/telegram/webhook", post(receive_webhook))
        .route("/api/telegram/debug", get(debug_snapshot))
        .with_state(state)
}

/// Error wrapper that maps the core taxonomy onto HTTP statuses.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, retry_after) = classify(&self.0);
        if status.is_server_error() {
            error!("request failed: {}", self.0);
        }

        let mut body = json!({ "success": false, "error": message });
        if let Some(d) = retry_after {
            body["retry_after_secs"] = json!(d.as_secs());
        }

        let mut resp = (status, Json(body)).into_response();
        if let Some(d) = retry_after {
            if let Ok(v) = header::HeaderValue::from_str(&d.as_secs().to_string()) {
                resp.headers_mut().insert(header::RETRY_AFTER, v);
            }
        }
        resp
    }
}

fn classify(e: &Error) -> (StatusCode, String, Option<std::time::Duration>) {
    match e {
        Error::Config(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone(), None),
        Error::WebhookConflict(msg) => (StatusCode::CONFLICT, msg.clone(), None),
        Error::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone(), None),
        Error::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.clone(), None),
        Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone(), None),
        Error::RateLimited { retry_after } => (
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded".to_string(),
            *retry_after,
        ),
        // Provider details are logged, not leaked.
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal error".to_string(),
            None,
        ),
    }
}

#[derive(Debug, Default, Deserialize)]
struct PageQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Serialize)]
struct PostsResponse {
    success: bool,
    posts: Vec<Post>,
    meta: PostsMeta,
}

#[derive(Debug, Serialize)]
struct PostsMeta {
    limit: usize,
    offset: usize,
    count: usize,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    channel_info: Option<Chat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bot_permissions: Option<BotPermissions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    administrators_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    success: bool,
    message: String,
    saved: usize,
    updates: usize,
}

/// `GET /api/telegram/posts?limit=&offset=`
///
/// Serves ingested posts from the store, through the posts cache. Reads are
/// side-effect free: this endpoint never calls the provider's update or
/// webhook methods. Diagnostics are best-effort enrichment: each sub-call
/// that fails becomes an absent field plus a note in `meta.message`, never a
/// failed response.
async fn list_posts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(q): Query<PageQuery>,
) -> std::result::Result<Json<PostsResponse>, ApiError> {
    state.check_rate(&headers).await?;

    let limit = q
        .limit
        .unwrap_or(state.cfg.default_page_size)
        .clamp(1, MAX_PAGE_SIZE);
    let offset = q.offset.unwrap_or(0);

    let mut notes: Vec<String> = Vec::new();

    let cache_key = format!("posts:{limit}:{offset}");
    let cached = { state.posts_cache.lock().await.get(cache_key.as_str()) };
    let posts = match cached {
        Some(posts) => posts,
        None => {
            let posts = { state.store.lock().await.list(limit, offset) };
            state.posts_cache.lock().await.set(cache_key, posts.clone());
            posts
        }
    };

    let diag = collect_diagnostics(&state, &mut notes).await;

    Ok(Json(PostsResponse {
        success: true,
        meta: PostsMeta {
            limit,
            offset,
            count: posts.len(),
            timestamp: Utc::now().to_rfc3339(),
            channel_info: diag.channel_info,
            bot_permissions: diag.bot_permissions,
            administrators_count: diag.administrators_count,
            message: if notes.is_empty() {
                None
            } else {
                Some(notes.join("; "))
            },
        },
        posts,
    }))
}

/// `GET /api/telegram/fetch` — trigger one sync cycle.
async fn fetch_posts(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> std::result::Result<Json<SyncResponse>, ApiError> {
    state.check_rate(&headers).await?;
    let SyncReport { updates, saved } = run_sync(&state).await?;
    Ok(Json(SyncResponse {
        success: true,
        message: format!("saved {saved} posts from {updates} updates"),
        saved,
        updates,
    }))
}

/// `POST /api/telegram/webhook` — push delivery receiver.
///
/// Everything except an auth failure is acknowledged with `{ ok: true }`,
/// including update types the mirror does not act on; an unacknowledged
/// update would put the provider into retry/backoff.
async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> std::result::Result<Json<Value>, ApiError> {
    if let Some(secret) = &state.cfg.webhook_secret {
        let given = headers
            .get("x-telegram-bot-api-secret-token")
            .and_then(|v| v.to_str().ok());
        if given != Some(secret.as_str()) {
            return Err(Error::Unauthorized("webhook secret mismatch".to_string()).into());
        }
    }

    let Ok(update) = serde_json::from_value::<Update>(payload) else {
        return Ok(Json(json!({ "ok": true })));
    };

    if let Some(msg) = update.channel_post {
        let matches = match state.cfg.channel.as_deref().and_then(ChannelRef::parse) {
            Some(channel) => channel.matches(msg.chat.id, msg.chat.username.as_deref()),
            // Nothing configured: mirror whatever the provider pushes here.
            None => true,
        };
        if matches {
            let mut post = post_from_message(msg);
            if state.client.is_configured() {
                state.client.resolve_post_media(&mut post).await;
            }
            {
                let mut store = state.store.lock().await;
                store.upsert(post, update.update_id);
                store.advance_cursor(update.update_id);
                store.save()?;
            }
            // Cached pages are stale now.
            state.posts_cache.lock().await.clear();
        } else {
            warn!("webhook delivered a post for an unconfigured channel, ignoring");
        }
    }

    Ok(Json(json!({ "ok": true })))
}

/// `GET /api/telegram/debug` — diagnostic snapshot.
async fn debug_snapshot(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> std::result::Result<Json<Value>, ApiError> {
    state.check_rate(&headers).await?;

    let (posts, cursor) = {
        let store = state.store.lock().await;
        (store.len(), store.cursor())
    };

    let mut body = json!({
        "configured": state.client.is_configured(),
        "store": { "posts": posts, "cursor": cursor },
        "timestamp": Utc::now().to_rfc3339(),
    });

    if state.client.is_configured() {
        let mut notes = Vec::new();
        body["bot"] = to_json(note("bot", state.client.get_me().await, &mut notes));
        body["channel_info"] = to_json(note(
            "channel_info",
            state.client.get_channel_info().await,
            &mut notes,
        ));
        body["bot_permissions"] = to_json(note(
            "bot_permissions",
            state.client.check_bot_permissions().await,
            &mut notes,
        ));
        body["administrators"] = to_json(note(
            "administrators",
            state.client.get_chat_administrators().await,
            &mut notes,
        ));
        body["webhook"] = to_json(note(
            "webhook_info",
            state.client.get_webhook_info().await,
            &mut notes,
        ));
        if !notes.is_empty() {
            body["message"] = json!(notes.join("; "));
        }
    }

    Ok(Json(body))
}

#[derive(Default)]
struct Diagnostics {
    channel_info: Option<Chat>,
    bot_permissions: Option<BotPermissions>,
    administrators_count: Option<usize>,
}

/// Fetch each diagnostic independently; a failure becomes an absent field and
/// a note, so enrichment can never block the post list.
async fn collect_diagnostics(state: &AppState, notes: &mut Vec<String>) -> Diagnostics {
    let mut out = Diagnostics::default();
    if !state.client.is_configured() {
        notes.push("telegram client not configured".to_string());
        return out;
    }

    let cached = { state.channel_cache.lock().await.get("channel-info") };
    out.channel_info = match cached {
        Some(info) => Some(info),
        None => {
            let fetched = note("channel_info", state.client.get_channel_info().await, notes);
            if let Some(info) = &fetched {
                state
                    .channel_cache
                    .lock()
                    .await
                    .set("channel-info".to_string(), info.clone());
            }
            fetched
        }
    };

    out.bot_permissions = note(
        "bot_permissions",
        state.client.check_bot_permissions().await,
        notes,
    );
    out.administrators_count = note(
        "administrators",
        state.client.get_chat_administrators().await,
        notes,
    )
    .map(|admins| admins.len());

    out
}

fn note<T>(label: &str, result: Result<T>, notes: &mut Vec<String>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            warn!("diagnostic {label} failed: {e}");
            notes.push(format!("{label} unavailable: {e}"));
            None
        }
    }
}

fn to_json<T: Serialize>(v: Option<T>) -> Value {
    v.and_then(|v| serde_json::to_value(v).ok())
        .unwrap_or(Value::Null)
}
