use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::time::Duration;
use tracing::{info, warn};

use super::advisor::{Advice, HealAdvisor};
use super::history::{DecisionLog, DecisionRecord, HealAction, HealthSnapshot};
use super::vitals::VitalsProbe;
use crate::context::RuntimeContext;
use crate::output::SpeechSink;
use crate::supervisor::{Restarter, RunState};

const RECENT_OUTCOMES: usize = 5;

/// Watchdog over the dispatch worker. Samples vitals on a fixed tick,
/// maps them to symptoms, asks the advisor for a remediation, rescales
/// its confidence by historical success, and executes the result.
///
/// One decision per tick at most; each symptom carries its own cooldown
/// so a persistent fault cannot trigger a remediation storm.
pub struct HealingArbiter {
    ctx: Arc<RuntimeContext>,
    advisor: Arc<dyn HealAdvisor>,
    restarter: Arc<dyn Restarter>,
    probe: Arc<dyn VitalsProbe>,
    speech: Arc<dyn SpeechSink>,
    log: Arc<DecisionLog>,
    cooldowns: Mutex<HashMap<&'static str, Instant>>,
}

impl HealingArbiter {
    pub fn new(
        ctx: Arc<RuntimeContext>,
        advisor: Arc<dyn HealAdvisor>,
        restarter: Arc<dyn Restarter>,
        probe: Arc<dyn VitalsProbe>,
        speech: Arc<dyn SpeechSink>,
        log: Arc<DecisionLog>,
    ) -> Self {
        Self {
            ctx,
            advisor,
            restarter,
            probe,
            speech,
            log,
            cooldowns: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let tick = Duration::from_secs(self.ctx.config.healing.tick_secs.max(1));
        let exit = self.ctx.exit.child_token();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(tick) => {}
                _ = exit.cancelled() => return,
            }
            for symptom in self.symptoms() {
                if let Some(record) = self.heal(symptom).await {
                    info!(
                        symptom,
                        action = record.action.as_str(),
                        confidence = record.confidence,
                        success = record.success,
                        "healing decision"
                    );
                }
            }
        }
    }

    /// Every trigger is evaluated each tick; coincident symptoms each get
    /// their own decision, bounded only by their own cooldowns.
    pub fn symptoms(&self) -> Vec<&'static str> {
        let cfg = &self.ctx.config.healing;
        let mut found = Vec::new();

        let running = self.ctx.lifecycle.borrow().state == RunState::Running;
        if running && self.ctx.heartbeat.age() > Duration::from_secs(cfg.heartbeat_stall_secs) {
            found.push("heartbeat_delay");
        }
        if self.probe.sample().mem_pct >= cfg.memory_pressure_pct {
            found.push("memory_pressure");
        }
        if self.ctx.channel.depth() > cfg.queue_depth_limit {
            found.push("queue_overflow");
        }
        found
    }

    /// Full decision cycle for one symptom. Returns `None` when the
    /// symptom is still cooling down.
    pub async fn heal(&self, symptom: &'static str) -> Option<DecisionRecord> {
        if !self.arm_cooldown(symptom) {
            return None;
        }

        let snapshot = self.snapshot(symptom);
        let advice = self.advisor.advise(&snapshot).await;
        let confidence = self.rescale(&advice);
        if confidence < 0.5 && !advice.explanation.is_empty() {
            info!(explanation = %advice.explanation, "low-confidence healing advice");
            self.speech.speak(&advice.explanation).await;
        }
        let success = self.execute(advice.action).await;

        let record = DecisionRecord {
            at: Utc::now(),
            snapshot,
            action: advice.action,
            confidence,
            success,
        };
        self.log.append(record.clone());
        Some(record)
    }

    fn snapshot(&self, symptom: &str) -> HealthSnapshot {
        let vitals = self.probe.sample();
        HealthSnapshot {
            symptom: symptom.to_string(),
            cpu_pct: vitals.cpu_pct,
            mem_pct: vitals.mem_pct,
            queue_depth: self.ctx.channel.depth(),
            heartbeat_age_secs: self.ctx.heartbeat.age().as_secs_f64(),
            recent: self.log.recent_outcomes(RECENT_OUTCOMES),
        }
    }

    /// Advisor confidence weighted by the empirical success rate of the
    /// proposed action, clamped to [0, 1].
    pub fn rescale(&self, advice: &Advice) -> f64 {
        (advice.confidence * self.log.success_rate(advice.action)).clamp(0.0, 1.0)
    }

    /// Executes a remediation and reports whether it took effect.
    pub async fn execute(&self, action: HealAction) -> bool {
        match action {
            HealAction::Observe => true,
            HealAction::ClearQueue => {
                let dropped = self.ctx.channel.drain();
                info!(dropped, "command backlog cleared");
                true
            }
            HealAction::RestartBrain => {
                // A restart is the most disruptive action; it stays gated
                // until the gentler remediation has a proven track record.
                let gate = self.ctx.config.healing.restart_gate;
                if self.log.success_rate(HealAction::ClearQueue) <= gate {
                    warn!("restart withheld, clear_queue success rate below gate");
                    return false;
                }
                match self.restarter.restart_dispatch().await {
                    Ok(()) => {
                        self.speech.speak("Recovered from a core fault.").await;
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "dispatch restart failed");
                        false
                    }
                }
            }
        }
    }

    /// True when the symptom is out of cooldown; arms it as a side effect.
    fn arm_cooldown(&self, symptom: &'static str) -> bool {
        let cooldown = Duration::from_secs(self.ctx.config.healing.cooldown_secs);
        let mut cooldowns = self
            .cooldowns
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        let now = Instant::now();
        if let Some(last) = cooldowns.get(symptom) {
            if now.duration_since(*last) < cooldown {
                return false;
            }
        }
        cooldowns.insert(symptom, now);
        true
    }
}
