//! Client-side conversation session.
//!
//! Owns the history (seeded with the configured welcome message), gates
//! outgoing text through the throttle, accumulates the in-flight assistant
//! message as chunks arrive, and re-derives display text plus directives
//! from the raw text on every render pass. Raw assistant text is the
//! authoritative source; the parsed view is a pure function of it.

use std::time::{Duration, Instant};

use crate::config::ChatbotConfig;
use crate::directive::{Parsed, parse};
use crate::error::ChatError;
use crate::throttle::{ThrottleGate, ThrottlePhase};
use crate::types::{ChatMessage, ChatRequest, Role};

const NOTICE_TTL: Duration = Duration::from_secs(10);

/// A user-visible, time-bounded notice (rate limit or upstream failure).
#[derive(Clone, Debug, PartialEq, Eq)]
struct Notice {
    text: String,
    until: Instant,
}

pub struct ChatSession {
    config: ChatbotConfig,
    history: Vec<ChatMessage>,
    gate: ThrottleGate,
    /// Index of the assistant message currently receiving chunks.
    in_flight: Option<usize>,
    notice: Option<Notice>,
}

impl ChatSession {
    pub fn new(config: ChatbotConfig) -> Self {
        let history = vec![ChatMessage::assistant(config.welcome_message.clone())];
        let gate = ThrottleGate::new(config.throttle);
        Self {
            config,
            history,
            gate,
            in_flight: None,
            notice: None,
        }
    }

    /// Gate and stage an outgoing message. On success the user message and
    /// an empty assistant placeholder are appended, and the returned request
    /// body (history up to and including the user message) should be put on
    /// the wire. A gated submission is silently dropped.
    pub fn submit(&mut self, text: &str, now: Instant) -> Option<ChatRequest> {
        let outcome = self.gate.try_submit(text, now);
        if !outcome.accepted() {
            tracing::debug!(?outcome, "submission dropped client-side");
            return None;
        }
        self.history.push(ChatMessage::user(text.trim()));
        let request = ChatRequest {
            messages: self.history.clone(),
        };
        self.history.push(ChatMessage::assistant(""));
        self.in_flight = Some(self.history.len() - 1);
        Some(request)
    }

    /// Activating a choice button re-enters the gate as a synthetic user
    /// message. Disabled while cooling down; link directives never pass
    /// through here because they do not re-enter the conversation.
    pub fn activate_choice(&mut self, label: &str, now: Instant) -> Option<ChatRequest> {
        self.submit(label, now)
    }

    /// The server accepted the request (response stream opened).
    pub fn on_accepted(&mut self, now: Instant) {
        self.gate.server_accepted(now);
    }

    /// Append a streamed chunk to the in-flight assistant message.
    pub fn on_chunk(&mut self, piece: &str) {
        if let Some(idx) = self.in_flight {
            if let Some(msg) = self.history.get_mut(idx) {
                msg.content.push_str(piece);
            }
        }
    }

    /// The stream finished cleanly; the accumulated raw text stays in the
    /// history as-is.
    pub fn on_stream_end(&mut self) {
        self.in_flight = None;
    }

    /// The request failed. Retryable failures (429, upstream errors) drive
    /// the gate into cooldown using the structured `Retry-After` value when
    /// present; hard denials get no retry affordance. The optimistic appends
    /// are rolled back so the history holds no unanswered message.
    pub fn on_error(&mut self, error: &ChatError, retry_after: Option<Duration>, now: Instant) {
        self.discard_in_flight();
        if let Some(last) = self.history.last() {
            if last.role == Role::User {
                self.history.pop();
            }
        }
        if error.retryable() {
            self.gate.server_rejected(retry_after, now);
            let text = match error {
                ChatError::RateLimited { .. } => {
                    "Oops! Slow down, you're sending messages too quickly.".to_string()
                }
                _ => format!("Error: {error}"),
            };
            self.notice = Some(Notice {
                text,
                until: now + NOTICE_TTL,
            });
        } else {
            self.gate.send_denied();
            self.notice = Some(Notice {
                text: format!("Request denied: {error}"),
                until: now + NOTICE_TTL,
            });
        }
    }

    /// Cancel mid-stream (user closed the widget). The partially-built
    /// assistant message is discarded, not appended to history; the user
    /// message that triggered it stays, unanswered.
    pub fn cancel(&mut self) {
        self.discard_in_flight();
        self.gate.send_denied();
    }

    /// User-initiated "start over": history truncated back to the seeded
    /// welcome message, throttle counters cleared, notices dismissed.
    pub fn reset(&mut self) {
        self.history.clear();
        self.history
            .push(ChatMessage::assistant(self.config.welcome_message.clone()));
        self.in_flight = None;
        self.notice = None;
        self.gate.reset();
    }

    fn discard_in_flight(&mut self) {
        if let Some(idx) = self.in_flight.take() {
            if idx < self.history.len() {
                self.history.remove(idx);
            }
        }
    }

    /// Derived view of one message: display text plus directives, re-parsed
    /// from raw text on every call so partial streams render correctly.
    pub fn view(&self, index: usize) -> Option<Parsed> {
        self.history.get(index).map(|msg| match msg.role {
            Role::Assistant => parse(&msg.content),
            Role::User => Parsed {
                display: msg.content.clone(),
                directives: Vec::new(),
            },
        })
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    pub fn phase(&mut self, now: Instant) -> ThrottlePhase {
        self.gate.poll(now)
    }

    /// Submit input and choice buttons are live only while idle; links stay
    /// enabled regardless.
    pub fn input_enabled(&mut self, now: Instant) -> bool {
        self.gate.input_enabled(now)
    }

    pub fn choices_enabled(&mut self, now: Instant) -> bool {
        self.gate.input_enabled(now)
    }

    pub fn remaining_today(&self) -> u32 {
        self.gate.remaining_today()
    }

    pub fn notice(&self, now: Instant) -> Option<&str> {
        match &self.notice {
            Some(notice) if notice.until > now => Some(notice.text.as_str()),
            _ => None,
        }
    }
}
