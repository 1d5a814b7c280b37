//! Content validation, run only once a request is admitted.
//!
//! Rejects oversized or spam-pattern payloads before they reach the
//! generation engine. Validation applies to the pending batch: the trailing
//! user messages not yet answered by the assistant.

use crate::config::ContentConfig;
use crate::error::{ChatError, RejectReason};
use crate::types::{ChatMessage, Role};

const URL_MARKERS: &[&str] = &["http://", "https://", "www."];

/// Validate the pending user messages of a request. Failure yields
/// `ContentRejected` (HTTP 400) and the engine is never touched.
pub fn validate_batch(messages: &[ChatMessage], config: &ContentConfig) -> Result<(), ChatError> {
    let pending = pending_batch(messages);

    let total_chars: usize = pending
        .iter()
        .map(|msg| msg.content.chars().count())
        .sum();
    if total_chars > config.max_chars {
        return Err(ChatError::ContentRejected {
            reason: RejectReason::TooLong,
        });
    }

    for msg in pending {
        if is_spam(&msg.content, config) {
            return Err(ChatError::ContentRejected {
                reason: RejectReason::SpamPattern,
            });
        }
    }
    Ok(())
}

/// User messages after the last assistant turn.
fn pending_batch(messages: &[ChatMessage]) -> &[ChatMessage] {
    let start = messages
        .iter()
        .rposition(|msg| msg.role == Role::Assistant)
        .map_or(0, |idx| idx + 1);
    &messages[start..]
}

fn is_spam(text: &str, config: &ContentConfig) -> bool {
    let lowered = text.to_ascii_lowercase();
    if URL_MARKERS.iter().any(|marker| lowered.contains(marker)) {
        return true;
    }
    if config
        .blocked_keywords
        .iter()
        .any(|keyword| lowered.contains(&keyword.to_ascii_lowercase()))
    {
        return true;
    }
    has_char_run(text, config.max_char_run)
}

/// Any single character repeated beyond `max_run` consecutive times.
fn has_char_run(text: &str, max_run: usize) -> bool {
    if max_run == 0 {
        return false;
    }
    let mut run = 0usize;
    let mut previous = None;
    for ch in text.chars() {
        if Some(ch) == previous {
            run += 1;
            if run > max_run {
                return true;
            }
        } else {
            previous = Some(ch);
            run = 1;
        }
    }
    false
}
