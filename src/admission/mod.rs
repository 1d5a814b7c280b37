//! Server-side admission control.
//!
//! [`admit`] composes the origin check, the admission oracle, and two
//! counter-backed limiters into one verdict with quota-disclosure metadata.
//! Evaluation order is fixed and short-circuiting: the cheap anti-forgery
//! origin gate first, then oracle classification (blocked bot traffic never
//! consumes counters), then the sliding window, then the token bucket. The
//! content validator runs only once a request is admitted.

pub mod counters;
pub mod oracle;
pub mod validate;

use std::time::{Duration, Instant};

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::config::ChatbotConfig;
pub use counters::{BucketParams, CounterStore, MemoryCounterStore, TokenDecision, WindowSample};
pub use oracle::{AdmissionOracle, OracleVerdict, UserAgentOracle};
pub use validate::validate_batch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReasonKind {
    None,
    ShieldViolation,
    BotDetected,
    RateLimited,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LimiterKind {
    None,
    SlidingWindow,
    TokenBucket,
}

/// What the serving side knows about a request before reading its body.
#[derive(Clone, Debug, Default)]
pub struct RequestMetadata {
    pub client_ip: String,
    pub origin: Option<String>,
    pub user_agent: Option<String>,
}

/// Produced fresh per request; never cached.
#[derive(Clone, Debug, PartialEq)]
pub struct AdmissionVerdict {
    pub allowed: bool,
    pub reason: ReasonKind,
    pub limiter: LimiterKind,
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: OffsetDateTime,
    pub retry_after_secs: Option<u64>,
}

impl AdmissionVerdict {
    fn denied(reason: ReasonKind) -> Self {
        Self {
            allowed: false,
            reason,
            limiter: LimiterKind::None,
            limit: 0,
            remaining: 0,
            reset_at: OffsetDateTime::now_utc(),
            retry_after_secs: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        match self.reason {
            ReasonKind::None => StatusCode::OK,
            ReasonKind::ShieldViolation | ReasonKind::BotDetected => StatusCode::FORBIDDEN,
            ReasonKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Project the verdict onto deterministic response headers, identical
    /// for every limiter so the client never special-cases which one fired.
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(
            "X-RateLimit-Limit",
            header_value(self.limit.to_string()),
        );
        headers.insert(
            "X-RateLimit-Remaining",
            header_value(self.remaining.to_string()),
        );
        if let Ok(reset) = self.reset_at.format(&Rfc3339) {
            headers.insert("X-RateLimit-Reset", header_value(reset));
        }
        if let Some(secs) = self.retry_after_secs {
            headers.insert("Retry-After", header_value(secs.to_string()));
        }
    }
}

fn header_value(value: String) -> HeaderValue {
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("0"))
}

/// Run the full pipeline for one request.
pub async fn admit(
    meta: &RequestMetadata,
    config: &ChatbotConfig,
    oracle: &dyn AdmissionOracle,
    counters: &dyn CounterStore,
) -> AdmissionVerdict {
    let now = Instant::now();

    // 1. Origin. Cheap anti-forgery gate, not a security boundary by itself.
    match &meta.origin {
        Some(origin) if origin == &config.app_origin => {}
        _ => return AdmissionVerdict::denied(ReasonKind::ShieldViolation),
    }

    // 2. Oracle classification. Blocked traffic consumes no counters.
    match oracle.evaluate(meta).await {
        OracleVerdict::Allow => {}
        OracleVerdict::BlockBot => return AdmissionVerdict::denied(ReasonKind::BotDetected),
        OracleVerdict::BlockShield => {
            return AdmissionVerdict::denied(ReasonKind::ShieldViolation);
        }
    }

    let limits = &config.limits;
    let key = meta.client_ip.as_str();

    // 3. Sliding window.
    let sample = counters.increment_window(key, limits.window, now).await;
    let reset_at = OffsetDateTime::now_utc() + sample.reset_in;
    if sample.count > limits.window_max {
        return AdmissionVerdict {
            allowed: false,
            reason: ReasonKind::RateLimited,
            limiter: LimiterKind::SlidingWindow,
            limit: limits.window_max,
            remaining: 0,
            reset_at,
            retry_after_secs: Some(ceil_secs(sample.reset_in)),
        };
    }

    // 4. Token bucket, smoothing bursts the window alone would mishandle
    // at its edges.
    let params = BucketParams {
        capacity: limits.bucket_capacity,
        refill_rate: limits.refill_rate,
        refill_interval: limits.refill_interval,
    };
    let decision = counters.consume_token(key, params, now).await;
    if !decision.ok {
        return AdmissionVerdict {
            allowed: false,
            reason: ReasonKind::RateLimited,
            limiter: LimiterKind::TokenBucket,
            limit: limits.bucket_capacity,
            remaining: 0,
            reset_at,
            retry_after_secs: Some(decision.retry_after.map_or(1, ceil_secs)),
        };
    }

    AdmissionVerdict {
        allowed: true,
        reason: ReasonKind::None,
        limiter: LimiterKind::None,
        limit: limits.window_max,
        remaining: limits.window_max.saturating_sub(sample.count),
        reset_at,
        retry_after_secs: None,
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 { secs + 1 } else { secs.max(1) }
}
