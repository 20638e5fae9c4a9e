use crate::gateway::ChatMessage;

#[derive(Debug, Clone, PartialEq)]
enum Turn {
    User(String),
    Assistant(String),
}

/// Sliding conversation window with summary compaction. Holds at most
/// `max_turns` recent turns plus one running summary line; when a
/// summarization attempt fails the window degrades to plain truncation
/// so it stays bounded either way.
pub struct ConversationWindow {
    turns: Vec<Turn>,
    summary: Option<String>,
    max_turns: usize,
    summary_trigger: usize,
    users_since_summary: usize,
}

impl ConversationWindow {
    pub fn new(max_turns: usize, summary_trigger: usize) -> Self {
        Self {
            turns: Vec::new(),
            summary: None,
            max_turns: max_turns.max(2),
            summary_trigger: summary_trigger.max(1),
            users_since_summary: 0,
        }
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::User(text.into()));
        self.users_since_summary += 1;
        self.truncate();
    }

    pub fn push_assistant(&mut self, text: impl Into<String>) {
        self.turns.push(Turn::Assistant(text.into()));
        self.truncate();
    }

    pub fn needs_summary(&self) -> bool {
        self.users_since_summary >= self.summary_trigger
    }

    /// Folds everything but the two most recent turns into the summary.
    pub fn apply_summary(&mut self, summary: impl Into<String>) {
        let keep_from = self.turns.len().saturating_sub(2);
        self.turns.drain(..keep_from);
        self.summary = Some(summary.into());
        self.users_since_summary = 0;
    }

    /// Fallback compaction when no summary could be produced: drop the
    /// oldest half and reset the trigger counter.
    pub fn compact_without_summary(&mut self) {
        let drop = self.turns.len() / 2;
        self.turns.drain(..drop);
        self.users_since_summary = 0;
    }

    /// Transcript of the turns that would be folded by a summary, for
    /// the summarization prompt.
    pub fn render_transcript(&self) -> String {
        let mut out = String::new();
        if let Some(summary) = &self.summary {
            out.push_str("Earlier context: ");
            out.push_str(summary);
            out.push('\n');
        }
        for turn in &self.turns {
            match turn {
                Turn::User(t) => {
                    out.push_str("User: ");
                    out.push_str(t);
                }
                Turn::Assistant(t) => {
                    out.push_str("Assistant: ");
                    out.push_str(t);
                }
            }
            out.push('\n');
        }
        out
    }

    /// Chat messages for a reasoning call, summary first.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(self.turns.len() + 1);
        if let Some(summary) = &self.summary {
            messages.push(ChatMessage::system(format!(
                "Summary of the conversation so far: {summary}"
            )));
        }
        for turn in &self.turns {
            messages.push(match turn {
                Turn::User(t) => ChatMessage::user(t.clone()),
                Turn::Assistant(t) => ChatMessage::assistant(t.clone()),
            });
        }
        messages
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    pub fn summary(&self) -> Option<&str> {
        self.summary.as_deref()
    }

    fn truncate(&mut self) {
        if self.turns.len() > self.max_turns {
            let overflow = self.turns.len() - self.max_turns;
            self.turns.drain(..overflow);
        }
    }
}
