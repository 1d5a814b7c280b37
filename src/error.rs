use axum::http::StatusCode;
use thiserror::Error;

use crate::admission::LimiterKind;

/// Why a message batch failed content validation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectReason {
    TooLong,
    SpamPattern,
}

/// Everything that can terminate a chat request. Rejections are terminal for
/// that request only; they never corrupt the conversation history.
///
/// Malformed directive syntax is deliberately absent: it degrades to literal
/// text in the parser and is never surfaced as an error.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ChatError {
    /// Client-side form of a 403 origin denial. The server reports the
    /// mismatch through its admission verdict; the session maps the rejected
    /// response to this variant.
    #[error("request origin not allowed")]
    OriginRejected,
    #[error("automated client blocked")]
    BotBlocked,
    #[error("request blocked by shield rules")]
    ShieldBlocked,
    #[error("rate limited ({limiter:?})")]
    RateLimited { limiter: LimiterKind },
    #[error("message rejected ({reason:?})")]
    ContentRejected { reason: RejectReason },
    #[error("generation timed out")]
    UpstreamTimeout,
    #[error("generation failed: {0}")]
    Upstream(String),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            ChatError::OriginRejected | ChatError::BotBlocked | ChatError::ShieldBlocked => {
                StatusCode::FORBIDDEN
            }
            ChatError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ChatError::ContentRejected { .. } => StatusCode::BAD_REQUEST,
            ChatError::UpstreamTimeout | ChatError::Upstream(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Hard denials get no retry affordance on the client.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ChatError::RateLimited { .. } | ChatError::UpstreamTimeout | ChatError::Upstream(_)
        )
    }
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Upstream(err.to_string())
    }
}
