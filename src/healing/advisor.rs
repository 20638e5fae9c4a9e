use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::history::{HealAction, HealthSnapshot};
use crate::gateway::{ChatMessage, ReasoningGateway, Tier};

/// Proposed remediation with the advisor's raw confidence, before any
/// history-based rescaling.
#[derive(Debug, Clone, PartialEq)]
pub struct Advice {
    pub action: HealAction,
    pub confidence: f64,
    pub explanation: String,
}

impl Advice {
    pub fn observe(explanation: impl Into<String>) -> Self {
        Self {
            action: HealAction::Observe,
            confidence: 0.0,
            explanation: explanation.into(),
        }
    }
}

/// Remediation oracle. Infallible: an advisor that cannot decide
/// returns `Observe` at zero confidence instead of an error.
#[async_trait]
pub trait HealAdvisor: Send + Sync {
    async fn advise(&self, snapshot: &HealthSnapshot) -> Advice;
}

/// Reasoning-backed advisor. Any gateway failure or unparseable reply
/// degrades to `Observe`; the healing loop never inherits an error.
pub struct LlmAdvisor {
    gateway: Arc<dyn ReasoningGateway>,
}

#[derive(Deserialize)]
struct AdviceReply {
    action: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    explanation: String,
}

impl LlmAdvisor {
    pub fn new(gateway: Arc<dyn ReasoningGateway>) -> Self {
        Self { gateway }
    }

    fn prompt(snapshot: &HealthSnapshot) -> Vec<ChatMessage> {
        let state = serde_json::to_string(snapshot)
            .unwrap_or_else(|_| format!("{{\"symptom\":\"{}\"}}", snapshot.symptom));
        vec![
            ChatMessage::system(
                "You are the self-healing arbiter of a runtime supervisor. \
                 Given a health snapshot, pick exactly one action from: \
                 observe, clear_queue, restart_brain. Reply with only a JSON \
                 object: {\"action\": \"...\", \"confidence\": 0.0-1.0, \
                 \"explanation\": \"...\"}. Prefer the least disruptive \
                 action that addresses the symptom.",
            ),
            ChatMessage::user(state),
        ]
    }

    fn parse(raw: &str) -> Option<Advice> {
        // Replies sometimes wrap the JSON in prose or code fences.
        let start = raw.find('{')?;
        let end = raw.rfind('}')?;
        if end <= start {
            return None;
        }
        let reply: AdviceReply = serde_json::from_str(&raw[start..=end]).ok()?;
        let action = match reply.action.as_str() {
            "observe" => HealAction::Observe,
            "clear_queue" => HealAction::ClearQueue,
            "restart_brain" => HealAction::RestartBrain,
            _ => return None,
        };
        Some(Advice {
            action,
            confidence: reply.confidence.clamp(0.0, 1.0),
            explanation: reply.explanation,
        })
    }
}

#[async_trait]
impl HealAdvisor for LlmAdvisor {
    async fn advise(&self, snapshot: &HealthSnapshot) -> Advice {
        let messages = Self::prompt(snapshot);
        match self.gateway.complete(&messages, Tier::Fast).await {
            Ok(raw) => Self::parse(&raw).unwrap_or_else(|| {
                debug!(reply = %raw, "unparseable healing advice, observing");
                Advice::observe("unparseable advisor reply")
            }),
            Err(e) => {
                debug!(error = %e, "healing advisor unreachable, observing");
                Advice::observe("advisor unreachable")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_json_reply() {
        let advice = LlmAdvisor::parse(
            r#"{"action": "clear_queue", "confidence": 0.8, "explanation": "backlog"}"#,
        )
        .unwrap();
        assert_eq!(advice.action, HealAction::ClearQueue);
        assert!((advice.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let advice = LlmAdvisor::parse(
            "Here is my decision:\n```json\n{\"action\": \"restart_brain\", \"confidence\": 0.9, \"explanation\": \"stalled\"}\n```",
        )
        .unwrap();
        assert_eq!(advice.action, HealAction::RestartBrain);
    }

    #[test]
    fn clamps_out_of_range_confidence() {
        let advice =
            LlmAdvisor::parse(r#"{"action": "observe", "confidence": 3.5, "explanation": ""}"#)
                .unwrap();
        assert_eq!(advice.confidence, 1.0);
    }

    #[test]
    fn rejects_unknown_actions() {
        assert!(LlmAdvisor::parse(r#"{"action": "reboot_host", "confidence": 1.0}"#).is_none());
        assert!(LlmAdvisor::parse("no json here").is_none());
    }
}
