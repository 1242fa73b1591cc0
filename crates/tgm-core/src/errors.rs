use std::time::Duration;

/// Core error type for the mirror service.
///
/// Adapter crates map provider-specific failures into this type so the HTTP
/// layer can translate them into status codes consistently (see
/// `tgm-server`). Partial failures (a single attachment, a single diagnostic
/// call) are degraded at the call site and never reach this taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("telegram api error: {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    #[error("webhook conflict: {0}")]
    WebhookConflict(String),

    #[error("rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    /// The request was superseded by a newer one. Never retried and never
    /// surfaced as a user-facing error.
    #[error("request cancelled")]
    Cancelled,

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, Error>;
