//! Meaningfulness filter: decides which transcribed fragments deserve a
//! reasoning call at all. Tuned for speech input, where filler and
//! recognition noise dominate.

/// Words that steer the runtime itself instead of a conversation turn.
pub const CONTROL_WORDS: &[&str] = &["stop", "pause", "cancel", "exit", "shutdown", "restart"];

/// Filler and acknowledgement noise that never warrants a reply.
const IGNORE_SET: &[&str] = &[
    "ok", "okay", "yes", "no", "yeah", "yep", "nope", "hmm", "hm", "uh", "um", "huh", "ah", "oh",
    "sure", "thanks", "thank you", "cool", "nice", "right", "fine", "alright", "bye", "goodbye",
];

const QUESTION_WORDS: &[&str] = &[
    "what", "who", "where", "when", "why", "how", "which", "is", "are", "can", "could", "do",
    "does", "did", "will", "would", "should", "tell", "explain", "show",
];

/// Lowercase, punctuation stripped at word edges, whitespace collapsed.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '\''))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// True when the normalized text is exactly one control word.
pub fn is_control(normalized: &str) -> bool {
    CONTROL_WORDS.contains(&normalized)
}

pub fn is_question(normalized: &str) -> bool {
    normalized.ends_with('?')
        || normalized
            .split_whitespace()
            .next()
            .is_some_and(|first| QUESTION_WORDS.contains(&first))
}

/// Whether a normalized utterance should reach the reasoning path.
/// Control words are handled earlier and are not dispatchable.
pub fn should_dispatch(normalized: &str) -> bool {
    if normalized.is_empty() || is_control(normalized) {
        return false;
    }
    if IGNORE_SET.contains(&normalized) {
        return false;
    }
    let words = normalized.split_whitespace().count();
    // Single non-question words are almost always recognition noise.
    if words == 1 && !is_question(normalized) {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_punctuation_and_spacing() {
        assert_eq!(normalize("  What's   the TIME?! "), "what's the time");
        assert_eq!(normalize("Stop."), "stop");
    }

    #[test]
    fn filler_is_filtered() {
        for noise in ["okay", "hmm", "thanks", "yeah"] {
            assert!(!should_dispatch(noise), "{noise} should be filtered");
        }
    }

    #[test]
    fn control_words_are_not_dispatchable() {
        for word in CONTROL_WORDS {
            assert!(is_control(word));
            assert!(!should_dispatch(word));
        }
    }

    #[test]
    fn single_question_words_pass() {
        assert!(should_dispatch("why"));
        assert!(!should_dispatch("banana"));
    }

    #[test]
    fn real_requests_pass() {
        assert!(should_dispatch("what's the weather like today"));
        assert!(should_dispatch("remember that my car is parked on level 3"));
    }
}
