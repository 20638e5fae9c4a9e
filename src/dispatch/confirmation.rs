use std::time::Instant;

use tokio::time::Duration;

const AFFIRM: &[&str] = &[
    "yes", "yeah", "yep", "sure", "confirm", "confirmed", "do it", "go ahead", "affirmative",
];
const NEGATIVE: &[&str] = &["no", "nope", "cancel", "stop", "don't", "negative", "never mind"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Answer {
    Affirm,
    Refuse,
    Unrelated,
}

/// Classifies a normalized utterance as an answer to a pending
/// confirmation. Anything else falls through to normal dispatch.
pub fn classify_answer(normalized: &str) -> Answer {
    if AFFIRM.contains(&normalized) {
        Answer::Affirm
    } else if NEGATIVE.contains(&normalized) {
        Answer::Refuse
    } else {
        Answer::Unrelated
    }
}

/// A sensitive action awaiting a yes/no from the user. At most one may
/// be pending; a new request while one is pending is refused.
#[derive(Debug, Clone)]
pub struct PendingConfirmation {
    pub action: String,
    pub argument: String,
    pub requested_at: Instant,
    pub timeout: Duration,
}

impl PendingConfirmation {
    pub fn new(action: impl Into<String>, argument: impl Into<String>, timeout: Duration) -> Self {
        Self {
            action: action.into(),
            argument: argument.into(),
            requested_at: Instant::now(),
            timeout,
        }
    }

    pub fn expired(&self) -> bool {
        self.requested_at.elapsed() >= self.timeout
    }
}
