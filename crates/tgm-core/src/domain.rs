use serde::{Deserialize, Serialize};

/// A mirrored channel post.
///
/// `message_id` is the identity within the channel: re-ingesting the same id
/// overwrites the stored row (idempotent upsert), it never duplicates.
/// `views`/`forwards` are display-only counters overwritten wholesale on each
/// refresh.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub message_id: i64,
    pub date: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<PostMedia>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forwards: Option<u64>,
}

/// At most one attachment per post. For photos only the highest-resolution
/// variant is kept.
///
/// `file_url` is non-persistent: provider download URLs expire, so it is
/// resolved best-effort and re-resolved when stale. A post whose attachment
/// failed to resolve keeps its `file_id` with `file_url: None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PostMedia {
    pub kind: MediaKind,
    pub file_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Document,
    Sticker,
    Audio,
    Voice,
}

/// The configured channel, by `@username` or numeric chat id.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelRef {
    Username(String),
    Id(i64),
}

impl ChannelRef {
    /// Parse a channel reference from config (`@name`, `name`, or `-100...`).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Ok(id) = trimmed.parse::<i64>() {
            return Some(ChannelRef::Id(id));
        }
        let name = trimmed.strip_prefix('@').unwrap_or(trimmed);
        if name.is_empty() {
            return None;
        }
        Some(ChannelRef::Username(name.to_lowercase()))
    }

    /// Does a chat match this reference? Usernames compare case-insensitively.
    pub fn matches(&self, chat_id: i64, chat_username: Option<&str>) -> bool {
        match self {
            ChannelRef::Id(id) => *id == chat_id,
            ChannelRef::Username(name) => chat_username
                .map(|u| u.eq_ignore_ascii_case(name))
                .unwrap_or(false),
        }
    }
}
