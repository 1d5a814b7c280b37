//! Pipeline-level properties: limiter precedence, exact quotas, counter
//! isolation, and validator boundaries.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chatgate::admission::{
    AdmissionOracle, BucketParams, CounterStore, LimiterKind, MemoryCounterStore, OracleVerdict,
    ReasonKind, RequestMetadata, UserAgentOracle, admit, validate_batch,
};
use chatgate::config::ChatbotConfig;
use chatgate::error::{ChatError, RejectReason};
use chatgate::types::ChatMessage;

fn meta_for(ip: &str) -> RequestMetadata {
    RequestMetadata {
        client_ip: ip.to_string(),
        origin: Some("http://localhost:3000".to_string()),
        user_agent: Some("Mozilla/5.0 (X11; Linux x86_64)".to_string()),
    }
}

fn oracle(config: &ChatbotConfig) -> UserAgentOracle {
    UserAgentOracle::new(config.security.clone())
}

#[tokio::test]
async fn exactly_the_window_limit_succeeds() {
    let mut config = ChatbotConfig::default();
    config.limits.window_max = 8;
    config.limits.bucket_capacity = 100;
    let oracle = oracle(&config);
    let counters = MemoryCounterStore::new();

    let mut allowed = 0;
    let mut rejected = 0;
    for _ in 0..20 {
        let verdict = admit(&meta_for("203.0.113.1"), &config, &oracle, &counters).await;
        if verdict.allowed {
            allowed += 1;
        } else {
            rejected += 1;
            assert_eq!(verdict.reason, ReasonKind::RateLimited);
            assert_eq!(verdict.limiter, LimiterKind::SlidingWindow);
            assert_eq!(verdict.remaining, 0);
        }
    }
    assert_eq!(allowed, 8);
    assert_eq!(rejected, 12);
}

#[tokio::test]
async fn bucket_grants_capacity_then_rejects_with_consistent_retry() {
    let mut config = ChatbotConfig::default();
    config.limits.window_max = 1000;
    config.limits.bucket_capacity = 5;
    config.limits.refill_rate = 2;
    config.limits.refill_interval = Duration::from_secs(10);
    let oracle = oracle(&config);
    let counters = MemoryCounterStore::new();

    for _ in 0..5 {
        assert!(
            admit(&meta_for("203.0.113.2"), &config, &oracle, &counters)
                .await
                .allowed
        );
    }
    let verdict = admit(&meta_for("203.0.113.2"), &config, &oracle, &counters).await;
    assert!(!verdict.allowed);
    assert_eq!(verdict.limiter, LimiterKind::TokenBucket);
    // The next token arrives within one refill interval.
    let retry = verdict.retry_after_secs.expect("Retry-After set");
    assert!((1..=10).contains(&retry), "retry_after_secs = {retry}");
}

#[tokio::test]
async fn identities_do_not_share_quota() {
    let mut config = ChatbotConfig::default();
    config.limits.window_max = 1;
    config.limits.bucket_capacity = 100;
    let oracle = oracle(&config);
    let counters = MemoryCounterStore::new();

    assert!(
        admit(&meta_for("203.0.113.3"), &config, &oracle, &counters)
            .await
            .allowed
    );
    assert!(
        !admit(&meta_for("203.0.113.3"), &config, &oracle, &counters)
            .await
            .allowed
    );
    // A different address still has its own quota.
    assert!(
        admit(&meta_for("203.0.113.4"), &config, &oracle, &counters)
            .await
            .allowed
    );
}

#[tokio::test]
async fn origin_and_oracle_run_before_any_counter() {
    let config = ChatbotConfig::default();
    let oracle = oracle(&config);
    let counters = MemoryCounterStore::new();

    let mut forged = meta_for("203.0.113.5");
    forged.origin = Some("https://forgery.example".to_string());
    let verdict = admit(&forged, &config, &oracle, &counters).await;
    assert_eq!(verdict.reason, ReasonKind::ShieldViolation);

    let mut bot = meta_for("203.0.113.5");
    bot.user_agent = Some("python-requests/2.31".to_string());
    let verdict = admit(&bot, &config, &oracle, &counters).await;
    assert_eq!(verdict.reason, ReasonKind::BotDetected);

    // Neither rejection consumed window quota for the address.
    let verdict = admit(&meta_for("203.0.113.5"), &config, &oracle, &counters).await;
    assert_eq!(verdict.remaining, config.limits.window_max - 1);
}

#[tokio::test]
async fn near_empty_bucket_grants_at_most_remaining_tokens_concurrently() {
    let store = Arc::new(MemoryCounterStore::new());
    let now = Instant::now();
    let params = BucketParams {
        capacity: 3,
        refill_rate: 2,
        refill_interval: Duration::from_secs(10),
    };

    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            store.consume_token("shared-ip", params, now).await.ok
        }));
    }
    let mut granted = 0;
    for handle in handles {
        if handle.await.expect("task panicked") {
            granted += 1;
        }
    }
    assert_eq!(granted, 3);
}

#[tokio::test]
async fn custom_oracle_slots_into_the_pipeline() {
    struct DenyAll;

    #[async_trait::async_trait]
    impl AdmissionOracle for DenyAll {
        async fn evaluate(&self, _meta: &RequestMetadata) -> OracleVerdict {
            OracleVerdict::BlockShield
        }
    }

    let config = ChatbotConfig::default();
    let counters = MemoryCounterStore::new();
    let verdict = admit(&meta_for("203.0.113.6"), &config, &DenyAll, &counters).await;
    assert_eq!(verdict.reason, ReasonKind::ShieldViolation);
}

#[test]
fn validator_boundaries() {
    let config = ChatbotConfig::default();

    let at_ceiling = vec![ChatMessage::user("x".repeat(1000).replace("xx", "xy"))];
    assert!(validate_batch(&at_ceiling, &config.content).is_ok());

    let over = vec![ChatMessage::user("ab".repeat(501))];
    assert_eq!(
        validate_batch(&over, &config.content),
        Err(ChatError::ContentRejected {
            reason: RejectReason::TooLong
        })
    );

    let url = vec![ChatMessage::user("check https://spam.example now")];
    assert_eq!(
        validate_batch(&url, &config.content),
        Err(ChatError::ContentRejected {
            reason: RejectReason::SpamPattern
        })
    );
}
