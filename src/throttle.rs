//! Client-side pacing of outgoing messages.
//!
//! This is an optimistic UX gate, not a security boundary; the authoritative
//! enforcement is the server-side admission pipeline. Every method takes an
//! explicit `now` so transitions are deterministic under test.

use std::time::{Duration, Instant};

use crate::config::ThrottleConfig;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThrottlePhase {
    Idle,
    Sending,
    Cooldown { until: Instant },
    DailyExhausted,
}

/// Outcome of a submit attempt. Everything but `Accepted` is a silent drop
/// with no state change (except reaching the daily cap, which latches).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted,
    DroppedEmpty,
    DroppedTooLong,
    DroppedTooSoon,
    DroppedDailyCap,
    /// A send is in flight or a cooldown is active.
    DroppedBusy,
}

impl SubmitOutcome {
    pub fn accepted(self) -> bool {
        self == SubmitOutcome::Accepted
    }
}

#[derive(Clone, Debug)]
pub struct ThrottleGate {
    config: ThrottleConfig,
    phase: ThrottlePhase,
    last_send_at: Option<Instant>,
    sent_today: u32,
}

impl ThrottleGate {
    pub fn new(config: ThrottleConfig) -> Self {
        Self {
            config,
            phase: ThrottlePhase::Idle,
            last_send_at: None,
            sent_today: 0,
        }
    }

    /// Expire a finished cooldown, then report the phase. Callers poll this
    /// on their UI tick; no user action is needed to leave `Cooldown`.
    pub fn poll(&mut self, now: Instant) -> ThrottlePhase {
        if let ThrottlePhase::Cooldown { until } = self.phase {
            if now >= until {
                self.phase = ThrottlePhase::Idle;
            }
        }
        self.phase
    }

    /// Gate an outgoing message. On `Accepted` the machine moves to
    /// `Sending` and the caller owns issuing the network request.
    pub fn try_submit(&mut self, text: &str, now: Instant) -> SubmitOutcome {
        match self.poll(now) {
            ThrottlePhase::Idle => {}
            ThrottlePhase::DailyExhausted => return SubmitOutcome::DroppedDailyCap,
            ThrottlePhase::Sending | ThrottlePhase::Cooldown { .. } => {
                return SubmitOutcome::DroppedBusy;
            }
        }
        if text.trim().is_empty() {
            return SubmitOutcome::DroppedEmpty;
        }
        if text.chars().count() > self.config.max_message_len {
            return SubmitOutcome::DroppedTooLong;
        }
        if let Some(last) = self.last_send_at {
            if now.duration_since(last) < self.config.min_spacing {
                return SubmitOutcome::DroppedTooSoon;
            }
        }
        if self.sent_today >= self.config.daily_cap {
            self.phase = ThrottlePhase::DailyExhausted;
            return SubmitOutcome::DroppedDailyCap;
        }
        self.phase = ThrottlePhase::Sending;
        SubmitOutcome::Accepted
    }

    /// The server accepted the request (2xx response started).
    pub fn server_accepted(&mut self, now: Instant) {
        self.last_send_at = Some(now);
        self.sent_today = self.sent_today.saturating_add(1);
        self.phase = if self.sent_today >= self.config.daily_cap {
            ThrottlePhase::DailyExhausted
        } else {
            ThrottlePhase::Idle
        };
    }

    /// The server rejected the request with a retryable failure (429 or an
    /// upstream error). `retry_after` comes from the `Retry-After` header
    /// when present; otherwise the configured default cooldown applies.
    pub fn server_rejected(&mut self, retry_after: Option<Duration>, now: Instant) {
        let wait = retry_after.unwrap_or(self.config.default_cooldown);
        self.phase = ThrottlePhase::Cooldown { until: now + wait };
    }

    /// A hard denial (403). No cooldown and no retry affordance; the gate
    /// just stops tracking the in-flight send.
    pub fn send_denied(&mut self) {
        if self.phase == ThrottlePhase::Sending {
            self.phase = ThrottlePhase::Idle;
        }
    }

    /// User-initiated "start over": back to `Idle` from any state with the
    /// daily counter zeroed.
    pub fn reset(&mut self) {
        self.phase = ThrottlePhase::Idle;
        self.last_send_at = None;
        self.sent_today = 0;
    }

    /// Whether the submit input and choice buttons are enabled. Link
    /// directives stay enabled regardless; they consume no quota.
    pub fn input_enabled(&mut self, now: Instant) -> bool {
        self.poll(now) == ThrottlePhase::Idle
    }

    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        match self.phase {
            ThrottlePhase::Cooldown { until } if until > now => Some(until - now),
            _ => None,
        }
    }

    pub fn sent_today(&self) -> u32 {
        self.sent_today
    }

    pub fn remaining_today(&self) -> u32 {
        self.config.daily_cap.saturating_sub(self.sent_today)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> ThrottleGate {
        ThrottleGate::new(ThrottleConfig::default())
    }

    fn small_gate(daily_cap: u32) -> ThrottleGate {
        ThrottleGate::new(ThrottleConfig {
            daily_cap,
            ..ThrottleConfig::default()
        })
    }

    #[test]
    fn accepts_and_round_trips_through_sending() {
        let mut g = gate();
        let t0 = Instant::now();
        assert_eq!(g.try_submit("hello", t0), SubmitOutcome::Accepted);
        assert_eq!(g.poll(t0), ThrottlePhase::Sending);
        g.server_accepted(t0);
        assert_eq!(g.poll(t0), ThrottlePhase::Idle);
        assert_eq!(g.sent_today(), 1);
    }

    #[test]
    fn drops_empty_and_oversized() {
        let mut g = gate();
        let t0 = Instant::now();
        assert_eq!(g.try_submit("   ", t0), SubmitOutcome::DroppedEmpty);
        let long = "x".repeat(1001);
        assert_eq!(g.try_submit(&long, t0), SubmitOutcome::DroppedTooLong);
        assert_eq!(g.poll(t0), ThrottlePhase::Idle);
    }

    #[test]
    fn enforces_minimum_spacing() {
        let mut g = gate();
        let t0 = Instant::now();
        assert!(g.try_submit("one", t0).accepted());
        g.server_accepted(t0);
        assert_eq!(
            g.try_submit("two", t0 + Duration::from_millis(500)),
            SubmitOutcome::DroppedTooSoon
        );
        assert!(g.try_submit("two", t0 + Duration::from_secs(2)).accepted());
    }

    #[test]
    fn cooldown_honors_retry_after_and_expires() {
        let mut g = gate();
        let t0 = Instant::now();
        assert!(g.try_submit("hi", t0).accepted());
        g.server_rejected(Some(Duration::from_secs(5)), t0);

        // Never immediately back to Idle, never before the deadline.
        assert!(matches!(g.poll(t0), ThrottlePhase::Cooldown { .. }));
        assert!(matches!(
            g.poll(t0 + Duration::from_millis(4_999)),
            ThrottlePhase::Cooldown { .. }
        ));
        assert_eq!(
            g.cooldown_remaining(t0 + Duration::from_secs(2)),
            Some(Duration::from_secs(3))
        );
        assert_eq!(g.poll(t0 + Duration::from_secs(5)), ThrottlePhase::Idle);
    }

    #[test]
    fn cooldown_defaults_when_header_missing() {
        let mut g = gate();
        let t0 = Instant::now();
        assert!(g.try_submit("hi", t0).accepted());
        g.server_rejected(None, t0);
        assert!(matches!(
            g.poll(t0 + Duration::from_secs(9)),
            ThrottlePhase::Cooldown { .. }
        ));
        assert_eq!(g.poll(t0 + Duration::from_secs(10)), ThrottlePhase::Idle);
    }

    #[test]
    fn submissions_blocked_during_cooldown() {
        let mut g = gate();
        let t0 = Instant::now();
        assert!(g.try_submit("hi", t0).accepted());
        g.server_rejected(Some(Duration::from_secs(5)), t0);
        assert_eq!(
            g.try_submit("again", t0 + Duration::from_secs(1)),
            SubmitOutcome::DroppedBusy
        );
        assert!(!g.input_enabled(t0 + Duration::from_secs(1)));
    }

    #[test]
    fn daily_cap_latches_and_reset_rearms() {
        let mut g = small_gate(2);
        let mut t = Instant::now();
        for text in ["one", "two"] {
            assert!(g.try_submit(text, t).accepted());
            g.server_accepted(t);
            t += Duration::from_secs(3);
        }
        assert_eq!(g.poll(t), ThrottlePhase::DailyExhausted);
        assert_eq!(g.try_submit("three", t), SubmitOutcome::DroppedDailyCap);
        assert_eq!(g.remaining_today(), 0);

        g.reset();
        assert_eq!(g.sent_today(), 0);
        assert!(g.try_submit("fresh", t).accepted());
    }

    #[test]
    fn hard_denial_returns_to_idle_without_cooldown() {
        let mut g = gate();
        let t0 = Instant::now();
        assert!(g.try_submit("hi", t0).accepted());
        g.send_denied();
        assert_eq!(g.poll(t0), ThrottlePhase::Idle);
        assert_eq!(g.cooldown_remaining(t0), None);
    }
}
