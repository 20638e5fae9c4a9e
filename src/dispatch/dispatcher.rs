use std::sync::Arc;
use std::time::Instant;

use tokio::time::Duration;
use tracing::{debug, info, warn};

use super::actions::{parse_action_reply, ActionRegistry, ACTION_PREFIX};
use super::confirmation::{classify_answer, Answer, PendingConfirmation};
use super::conversation::ConversationWindow;
use super::fastpath::{self, FastAction};
use super::filter;
use crate::command::Command;
use crate::context::{RuntimeContext, EXIT_OK, EXIT_RESTART};
use crate::gateway::{ChatMessage, ReasoningGateway, Tier, TokenEvent};
use crate::healing::VitalsProbe;
use crate::memory::{HybridRetriever, MemoryStore};
use crate::output::{SpeechSink, TokenSink};
use crate::supervisor::RunState;

const MEMORY_HITS: usize = 4;

/// Picks the reasoning tier for an utterance. Cheap heuristic: short
/// requests go fast, analytical or long ones go deep.
pub fn choose_tier(text: &str) -> Tier {
    const DEEP_CUES: &[&str] = &[
        "explain", "analyze", "analyse", "plan", "design", "compare", "summarize", "write",
        "debug",
    ];
    let lower = text.to_lowercase();
    let words = lower.split_whitespace().count();
    if words > 24 || DEEP_CUES.iter().any(|cue| lower.contains(cue)) {
        Tier::Deep
    } else if words < 8 {
        Tier::Fast
    } else {
        Tier::Mid
    }
}

/// The brain loop. Single consumer of the command channel; owns the
/// conversation window and the pending-confirmation slot. One instance
/// per supervisor epoch, never shared.
pub struct Dispatcher {
    epoch: u64,
    ctx: Arc<RuntimeContext>,
    gateway: Arc<dyn ReasoningGateway>,
    speech: Arc<dyn SpeechSink>,
    sink: Option<Arc<dyn TokenSink>>,
    memory: Arc<MemoryStore>,
    retriever: HybridRetriever,
    probe: Arc<dyn VitalsProbe>,
    actions: ActionRegistry,
    window: ConversationWindow,
    pending: Option<PendingConfirmation>,
    awake: bool,
    last_activity: Instant,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        epoch: u64,
        ctx: Arc<RuntimeContext>,
        gateway: Arc<dyn ReasoningGateway>,
        speech: Arc<dyn SpeechSink>,
        sink: Option<Arc<dyn TokenSink>>,
        memory: Arc<MemoryStore>,
        retriever: HybridRetriever,
        probe: Arc<dyn VitalsProbe>,
    ) -> Self {
        let cfg = &ctx.config;
        let actions = ActionRegistry::builtin(Arc::clone(&memory), ctx.exit.clone());
        let window = ConversationWindow::new(cfg.dispatch.max_turns, cfg.dispatch.summary_trigger);
        let awake = cfg.start_awake;
        Self {
            epoch,
            ctx,
            gateway,
            speech,
            sink,
            memory,
            retriever,
            probe,
            actions,
            window,
            pending: None,
            awake,
            last_activity: Instant::now(),
        }
    }

    /// Runs until superseded by a newer epoch, told to stop, or the
    /// process-wide exit fires. Per-command failures are contained; only
    /// a failure of the loop machinery itself returns `Err`.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let pop_wait = Duration::from_millis(self.ctx.config.pop_timeout_ms.max(10));
        let backoff = Duration::from_millis(self.ctx.config.dispatch.error_backoff_ms);
        let mut lifecycle = self.ctx.lifecycle.clone();

        info!(epoch = self.epoch, "dispatch loop running");
        loop {
            self.ctx.heartbeat.beat();

            let lc = *lifecycle.borrow_and_update();
            if lc.epoch != self.epoch || lc.state != RunState::Running {
                info!(epoch = self.epoch, "dispatch loop superseded, exiting");
                return Ok(());
            }
            if self.ctx.exit.requested() {
                return Ok(());
            }

            self.expire_confirmation().await;
            self.maybe_sleep();

            let Some(cmd) = self.ctx.channel.pop_timeout(pop_wait).await else {
                continue;
            };
            if let Err(e) = self.handle_command(cmd).await {
                warn!(epoch = self.epoch, error = %e, "command handling failed");
                tokio::time::sleep(backoff).await;
            }
        }
    }

    async fn handle_command(&mut self, cmd: Command) -> anyhow::Result<()> {
        let mut normalized = filter::normalize(&cmd.text);
        if normalized.is_empty() {
            return Ok(());
        }

        if !self.awake {
            let wake = self.ctx.config.wake_word.to_lowercase();
            if !normalized.contains(wake.as_str()) {
                return Ok(());
            }
            self.awake = true;
            self.last_activity = Instant::now();
            normalized = strip_wake_word(&normalized, &wake);
            if normalized.is_empty() {
                self.speech.speak("Yes?").await;
                return Ok(());
            }
        }
        self.last_activity = Instant::now();

        if filter::is_control(&normalized) {
            return self.handle_control(&normalized).await;
        }

        // The confirmation answer must be consumed before the
        // meaningfulness filter, which would otherwise eat a bare yes/no.
        if let Some(pending) = self.pending.take() {
            match classify_answer(&normalized) {
                Answer::Affirm => return self.run_confirmed(pending).await,
                Answer::Refuse => {
                    self.speech.speak("Okay, I won't.").await;
                    return Ok(());
                }
                Answer::Unrelated => self.pending = Some(pending),
            }
        }

        if !filter::should_dispatch(&normalized) {
            debug!(text = %normalized, "utterance filtered");
            return Ok(());
        }

        if let Some(fast) = fastpath::detect(&normalized) {
            return self.handle_fast(fast).await;
        }

        self.reason_turn(&cmd.text, &normalized).await
    }

    async fn handle_control(&mut self, word: &str) -> anyhow::Result<()> {
        match word {
            "stop" | "pause" | "cancel" => {
                self.ctx.interrupt.raise();
                self.speech.cancel().await;
                if self.pending.take().is_some() {
                    self.speech.speak("Cancelled.").await;
                }
            }
            "exit" | "shutdown" => {
                self.speech.speak("Shutting down.").await;
                self.ctx.exit.request(EXIT_OK);
            }
            "restart" => {
                self.speech.speak("Restarting.").await;
                self.ctx.exit.request(EXIT_RESTART);
            }
            _ => {}
        }
        Ok(())
    }

    async fn run_confirmed(&mut self, pending: PendingConfirmation) -> anyhow::Result<()> {
        match self.actions.execute(&pending.action, &pending.argument).await {
            Some(result) => self.speech.speak(&result).await,
            None => self.speech.speak("I no longer know how to do that.").await,
        }
        Ok(())
    }

    async fn handle_fast(&mut self, action: FastAction) -> anyhow::Result<()> {
        match action {
            FastAction::CurrentTime => {
                if let Some(reply) = self.actions.execute("current_time", "").await {
                    self.speech.speak(&reply).await;
                }
            }
            FastAction::CurrentDate => {
                let date = chrono::Local::now().format("%A, %B %-d").to_string();
                self.speech.speak(&format!("Today is {date}.")).await;
            }
            FastAction::MemoryCount => {
                let count = self.memory.len();
                let reply = match count {
                    0 => "I'm not holding any memories yet.".to_string(),
                    1 => "I'm holding one memory.".to_string(),
                    n => format!("I'm holding {n} memories."),
                };
                self.speech.speak(&reply).await;
            }
            FastAction::SystemStatus => {
                let vitals = self.probe.sample();
                let reply = format!(
                    "Running normally. CPU at {:.0} percent, memory at {:.0} percent, {} commands queued.",
                    vitals.cpu_pct,
                    vitals.mem_pct,
                    self.ctx.channel.depth()
                );
                self.speech.speak(&reply).await;
            }
            FastAction::ClearMemory => {
                if self.pending.is_some() {
                    self.speech
                        .speak("I'm still waiting on your last confirmation.")
                        .await;
                    return Ok(());
                }
                let timeout =
                    Duration::from_millis(self.ctx.config.dispatch.confirmation_timeout_ms);
                self.pending = Some(PendingConfirmation::new("clear_memory", "", timeout));
                self.speech
                    .speak("That will erase everything I remember. Are you sure?")
                    .await;
            }
            FastAction::Remember(fact) => {
                if self.memory.contains_text(&fact) {
                    self.speech.speak("I already know that.").await;
                } else {
                    self.memory.add(&fact, &["user"]);
                    self.speech.speak("Noted.").await;
                }
            }
        }
        Ok(())
    }

    /// Full reasoning turn: window upkeep, prompt assembly, streamed
    /// reply with sentence-chunked speech, then action or memorization
    /// follow-up.
    async fn reason_turn(&mut self, raw: &str, normalized: &str) -> anyhow::Result<()> {
        self.window.push_user(raw);
        self.maybe_summarize().await;

        let mut messages = vec![self.system_message(normalized)];
        messages.extend(self.window.to_messages());
        let tier = choose_tier(normalized);

        let interrupt = self.ctx.interrupt.arm();
        let min_chars = self.ctx.config.dispatch.min_speak_chars;

        let mut rx = self.gateway.stream(&messages, tier).await;
        let mut reply = String::new();
        let mut unspoken = String::new();
        let mut failed = false;
        let mut interrupted = false;
        let mut maybe_action = true;

        while let Some(event) = rx.recv().await {
            match event {
                TokenEvent::Token(token) => {
                    self.ctx.heartbeat.beat();
                    if interrupt.is_cancelled() {
                        interrupted = true;
                        self.speech.cancel().await;
                        break;
                    }
                    reply.push_str(&token);
                    if let Some(sink) = &self.sink {
                        sink.token(&token);
                    }
                    // Action replies are directives, never spoken aloud.
                    // Tokens withheld while the prefix was still ambiguous
                    // are replayed in full the moment it diverges.
                    if maybe_action {
                        if looks_like_action(&reply) {
                            continue;
                        }
                        maybe_action = false;
                        unspoken.push_str(&reply);
                    } else {
                        unspoken.push_str(&token);
                    }
                    while let Some(sentence) = take_sentence(&mut unspoken, min_chars) {
                        self.speech.speak(&sentence).await;
                    }
                }
                TokenEvent::Done => break,
                TokenEvent::Failed(e) => {
                    warn!(error = %e, "reasoning stream failed");
                    failed = true;
                    break;
                }
            }
        }
        if let Some(sink) = &self.sink {
            sink.end();
        }

        if failed {
            self.speech
                .speak("I'm having trouble reaching my reasoning service right now.")
                .await;
            // A partial reply stays in the window as context but never
            // counts as a finished turn: no remainder, no memorization.
            if reply.trim().is_empty() {
                self.window.push_assistant("(reasoning unavailable)");
            } else {
                self.window.push_assistant(reply.trim());
            }
            return Ok(());
        }
        if interrupted {
            info!("reply interrupted by the user");
            if !reply.trim().is_empty() {
                self.window.push_assistant(reply.trim());
            }
            return Ok(());
        }

        let reply = reply.trim().to_string();
        if let Some((name, argument)) = parse_action_reply(&reply) {
            return self.handle_action_reply(&name, &argument).await;
        }

        if !unspoken.trim().is_empty() {
            self.speech.speak(unspoken.trim()).await;
        }
        self.window.push_assistant(reply.clone());
        self.maybe_memorize(normalized, &reply);

        let wait = Duration::from_secs(self.ctx.config.dispatch.speech_wait_secs);
        if !self.speech.wait_idle(wait).await {
            warn!("speech sink did not drain in time, cancelling playback");
            self.speech.cancel().await;
        }
        Ok(())
    }

    async fn handle_action_reply(&mut self, name: &str, argument: &str) -> anyhow::Result<()> {
        if !self.actions.contains(name) {
            debug!(action = name, "model requested an unknown action");
            self.speech.speak("I can't do that.").await;
            self.window.push_assistant("(unknown action refused)");
            return Ok(());
        }
        if self.actions.is_sensitive(name) {
            // One confirmation at a time; a new request is refused, not
            // swapped in under the user.
            if self.pending.is_some() {
                self.speech
                    .speak("I'm still waiting on your last confirmation.")
                    .await;
                return Ok(());
            }
            let timeout = Duration::from_millis(self.ctx.config.dispatch.confirmation_timeout_ms);
            self.pending = Some(PendingConfirmation::new(name, argument, timeout));
            self.speech
                .speak(&format!("That would run {name}. Should I go ahead?"))
                .await;
            self.window
                .push_assistant(format!("(awaiting confirmation for {name})"));
            return Ok(());
        }
        if let Some(result) = self.actions.execute(name, argument).await {
            let spoken = self.followup_reply(name, &result).await;
            self.speech.speak(&spoken).await;
            self.window.push_assistant(spoken);
        }
        Ok(())
    }

    /// Second reasoning pass after a safe action, turning its raw result
    /// into a conversational reply. Falls back to the raw result.
    async fn followup_reply(&self, action: &str, result: &str) -> String {
        let mut messages = vec![ChatMessage::system(format!(
            "The runtime action `{action}` just completed with this result: \
             {result}. Tell the user in one short spoken sentence."
        ))];
        messages.extend(self.window.to_messages());
        match self.gateway.complete(&messages, Tier::Fast).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!(error = %e, "action follow-up failed, speaking raw result");
                result.to_string()
            }
        }
    }

    async fn maybe_summarize(&mut self) {
        if !self.window.needs_summary() {
            return;
        }
        let prompt = vec![
            ChatMessage::system(
                "Summarize this conversation in under 80 words, keeping names, \
                 preferences, and open tasks. Reply with only the summary.",
            ),
            ChatMessage::user(self.window.render_transcript()),
        ];
        match self.gateway.complete(&prompt, Tier::Fast).await {
            Ok(summary) => {
                debug!("conversation window summarized");
                self.window.apply_summary(summary.trim());
            }
            Err(e) => {
                debug!(error = %e, "summarization failed, truncating instead");
                self.window.compact_without_summary();
            }
        }
    }

    fn system_message(&self, query: &str) -> ChatMessage {
        let cfg = &self.ctx.config;
        let mut content = format!(
            "You are {}, a concise voice assistant. Replies are spoken aloud, \
             so keep them short and conversational. To perform a runtime \
             action instead of answering, reply with exactly \
             `{ACTION_PREFIX} <name> | <argument>`. Available actions: {}.",
            cfg.assistant_name,
            self.actions.describe()
        );
        let hits = self.retriever.search(query, MEMORY_HITS);
        if !hits.is_empty() {
            content.push_str("\nThings you remember that may be relevant:");
            for hit in hits {
                content.push_str("\n- ");
                content.push_str(&hit.text);
            }
        }
        ChatMessage::system(content)
    }

    /// Keeps factual answers to direct questions, deduplicated by text.
    fn maybe_memorize(&self, normalized_query: &str, reply: &str) {
        if reply.len() < self.ctx.config.dispatch.memorize_min_chars {
            return;
        }
        if !filter::is_question(normalized_query) {
            return;
        }
        if self.memory.contains_text(reply) {
            return;
        }
        self.memory.add(reply, &["auto"]);
    }

    /// Drops an expired confirmation and tells the user; silence would
    /// leave them thinking the request is still live.
    async fn expire_confirmation(&mut self) {
        if self.pending.as_ref().is_some_and(|p| p.expired()) {
            if let Some(p) = self.pending.take() {
                info!(action = %p.action, "pending confirmation expired");
                self.speech.speak("That request timed out.").await;
            }
        }
    }

    fn maybe_sleep(&mut self) {
        let secs = self.ctx.config.auto_sleep_secs;
        if secs == 0 || !self.awake || self.pending.is_some() {
            return;
        }
        if self.last_activity.elapsed() >= Duration::from_secs(secs) {
            info!("going back to sleep");
            self.awake = false;
        }
    }
}

fn strip_wake_word(normalized: &str, wake: &str) -> String {
    normalized
        .split_whitespace()
        .filter(|w| *w != wake)
        .collect::<Vec<_>>()
        .join(" ")
}

/// True while the reply so far could still be an action directive.
fn looks_like_action(reply: &str) -> bool {
    let head = reply.trim_start();
    head.starts_with(ACTION_PREFIX) || ACTION_PREFIX.starts_with(head)
}

/// Splits off the leading sentence once it is long enough to be worth a
/// synthesis call. Boundaries are sentence punctuation or a newline.
fn take_sentence(buf: &mut String, min_chars: usize) -> Option<String> {
    let cut = buf.char_indices().find_map(|(i, c)| {
        let end = i + c.len_utf8();
        (matches!(c, '.' | '!' | '?' | '\n') && end >= min_chars).then_some(end)
    })?;
    let rest = buf.split_off(cut);
    let sentence = std::mem::replace(buf, rest).trim().to_string();
    if sentence.is_empty() {
        None
    } else {
        Some(sentence)
    }
}
