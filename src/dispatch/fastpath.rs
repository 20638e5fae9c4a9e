//! Local intents answered without a reasoning call. Matching is exact
//! enough that a miss simply falls through to the reasoning path.

/// Intent the dispatcher can satisfy locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FastAction {
    CurrentTime,
    CurrentDate,
    MemoryCount,
    /// Destructive; the dispatcher routes this through confirmation.
    ClearMemory,
    SystemStatus,
    Remember(String),
}

/// Matches a normalized utterance against the fast-path table.
pub fn detect(normalized: &str) -> Option<FastAction> {
    if let Some(fact) = remember_payload(normalized) {
        return Some(FastAction::Remember(fact.to_string()));
    }

    let contains_any =
        |needles: &[&str]| needles.iter().any(|needle| normalized.contains(needle));

    if contains_any(&["what time is it", "what's the time", "current time", "time is it"]) {
        return Some(FastAction::CurrentTime);
    }
    if contains_any(&["what's the date", "what is the date", "today's date", "what day is it"]) {
        return Some(FastAction::CurrentDate);
    }
    if contains_any(&["how many memories", "how much do you remember", "memory count"]) {
        return Some(FastAction::MemoryCount);
    }
    if contains_any(&["clear your memory", "clear memory", "forget everything", "wipe your memory"])
    {
        return Some(FastAction::ClearMemory);
    }
    if contains_any(&["system status", "how are you running", "health check", "status report"]) {
        return Some(FastAction::SystemStatus);
    }
    None
}

/// Extracts the fact from an explicit memorization request.
fn remember_payload(normalized: &str) -> Option<&str> {
    for prefix in ["remember that ", "remember "] {
        if let Some(rest) = normalized.strip_prefix(prefix) {
            let rest = rest.trim();
            if !rest.is_empty() {
                return Some(rest);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_and_date_are_detected() {
        assert_eq!(detect("what time is it"), Some(FastAction::CurrentTime));
        assert_eq!(detect("what's the date today"), Some(FastAction::CurrentDate));
    }

    #[test]
    fn remember_extracts_the_fact() {
        assert_eq!(
            detect("remember that my wifi password is hunter2"),
            Some(FastAction::Remember("my wifi password is hunter2".to_string()))
        );
        assert_eq!(detect("remember "), None);
    }

    #[test]
    fn clear_memory_is_detected() {
        assert_eq!(detect("please clear your memory"), Some(FastAction::ClearMemory));
    }

    #[test]
    fn unrelated_text_falls_through() {
        assert_eq!(detect("tell me a story about a dragon"), None);
        assert_eq!(detect("what is quantum entanglement"), None);
    }
}
