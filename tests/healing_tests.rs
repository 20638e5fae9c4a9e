use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use vigil::command::CommandSource;
use vigil::config::Config;
use vigil::context::RuntimeContext;
use vigil::healing::{
    Advice, DecisionLog, DecisionRecord, FixedProbe, HealAction, HealAdvisor, HealingArbiter,
    HealthSnapshot,
};
use vigil::output::RecordingSpeech;
use vigil::supervisor::{Lifecycle, Restarter};

struct ScriptedAdvisor {
    advice: Advice,
}

#[async_trait]
impl HealAdvisor for ScriptedAdvisor {
    async fn advise(&self, _snapshot: &HealthSnapshot) -> Advice {
        self.advice.clone()
    }
}

struct FakeRestarter {
    calls: AtomicUsize,
    fail: bool,
}

impl FakeRestarter {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Restarter for FakeRestarter {
    async fn restart_dispatch(&self) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("restart refused")
        }
        Ok(())
    }
}

fn record(action: HealAction, success: bool) -> DecisionRecord {
    DecisionRecord {
        at: Utc::now(),
        snapshot: HealthSnapshot {
            symptom: "queue_overflow".to_string(),
            cpu_pct: 10.0,
            mem_pct: 40.0,
            queue_depth: 0,
            heartbeat_age_secs: 0.1,
            recent: Vec::new(),
        },
        action,
        confidence: 0.7,
        success,
    }
}

struct Harness {
    ctx: Arc<RuntimeContext>,
    arbiter: Arc<HealingArbiter>,
    restarter: Arc<FakeRestarter>,
    probe: Arc<FixedProbe>,
    speech: Arc<RecordingSpeech>,
    log: Arc<DecisionLog>,
    _dir: tempfile::TempDir,
}

fn harness(advice: Advice, restarter_fails: bool, seed: &[DecisionRecord]) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let config = Arc::new(Config::default());
    let (_tx, rx) = Lifecycle::channel();
    let ctx = Arc::new(RuntimeContext::new(config, rx));

    let log = Arc::new(DecisionLog::load(dir.path().join("healing.json"), 50));
    for r in seed {
        log.append(r.clone());
    }

    let restarter = FakeRestarter::new(restarter_fails);
    let probe = Arc::new(FixedProbe::new(10.0, 40.0));
    let speech = RecordingSpeech::new();
    let arbiter = Arc::new(HealingArbiter::new(
        Arc::clone(&ctx),
        Arc::new(ScriptedAdvisor { advice }),
        Arc::clone(&restarter) as Arc<dyn Restarter>,
        Arc::clone(&probe) as Arc<dyn vigil::healing::VitalsProbe>,
        Arc::clone(&speech) as Arc<dyn vigil::output::SpeechSink>,
        Arc::clone(&log),
    ));
    Harness {
        ctx,
        arbiter,
        restarter,
        probe,
        speech,
        log,
        _dir: dir,
    }
}

#[test]
fn success_rate_defaults_to_even_odds() {
    let dir = tempfile::tempdir().unwrap();
    let log = DecisionLog::load(dir.path().join("healing.json"), 50);
    assert_eq!(log.success_rate(HealAction::ClearQueue), 0.5);
}

#[test]
fn success_rate_tracks_per_action_history() {
    let dir = tempfile::tempdir().unwrap();
    let log = DecisionLog::load(dir.path().join("healing.json"), 50);
    log.append(record(HealAction::ClearQueue, true));
    log.append(record(HealAction::ClearQueue, false));
    log.append(record(HealAction::RestartBrain, false));

    assert_eq!(log.success_rate(HealAction::ClearQueue), 0.5);
    assert_eq!(log.success_rate(HealAction::RestartBrain), 0.0);
    assert_eq!(log.success_rate(HealAction::Observe), 0.5);
}

#[test]
fn log_is_capped_and_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("healing.json");
    let log = DecisionLog::load(path.clone(), 50);
    for _ in 0..60 {
        log.append(record(HealAction::Observe, true));
    }
    assert_eq!(log.len(), 50);

    let reloaded = DecisionLog::load(path, 50);
    assert_eq!(reloaded.len(), 50);
}

#[test]
fn corrupt_log_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("healing.json");
    std::fs::write(&path, "][ nonsense").unwrap();
    let log = DecisionLog::load(path, 50);
    assert!(log.is_empty());
}

#[tokio::test]
async fn confidence_is_rescaled_by_history_and_bounded() {
    let h = harness(
        Advice {
            action: HealAction::ClearQueue,
            confidence: 0.8,
            explanation: String::new(),
        },
        false,
        &[],
    );
    let advice = Advice {
        action: HealAction::ClearQueue,
        confidence: 0.8,
        explanation: String::new(),
    };
    // Empty history: 0.8 * 0.5 prior.
    let rescaled = h.arbiter.rescale(&advice);
    assert!((rescaled - 0.4).abs() < 1e-9);
    assert!((0.0..=1.0).contains(&rescaled));
}

#[tokio::test]
async fn clear_queue_drains_the_backlog() {
    let h = harness(
        Advice {
            action: HealAction::ClearQueue,
            confidence: 1.0,
            explanation: String::new(),
        },
        false,
        &[],
    );
    for i in 0..5 {
        h.ctx.channel.push(CommandSource::Text, format!("stale {i}"));
    }

    assert!(h.arbiter.execute(HealAction::ClearQueue).await);
    assert_eq!(h.ctx.channel.depth(), 0);
}

#[tokio::test]
async fn restart_is_withheld_without_a_track_record() {
    // All clear_queue attempts failed, so the rate sits below the gate.
    let seed = vec![
        record(HealAction::ClearQueue, false),
        record(HealAction::ClearQueue, false),
    ];
    let h = harness(
        Advice {
            action: HealAction::RestartBrain,
            confidence: 1.0,
            explanation: String::new(),
        },
        false,
        &seed,
    );

    assert!(!h.arbiter.execute(HealAction::RestartBrain).await);
    assert_eq!(h.restarter.calls(), 0);
}

#[tokio::test]
async fn restart_fires_and_announces_recovery() {
    let seed = vec![
        record(HealAction::ClearQueue, true),
        record(HealAction::ClearQueue, true),
    ];
    let h = harness(
        Advice {
            action: HealAction::RestartBrain,
            confidence: 1.0,
            explanation: String::new(),
        },
        false,
        &seed,
    );

    assert!(h.arbiter.execute(HealAction::RestartBrain).await);
    assert_eq!(h.restarter.calls(), 1);
    assert!(h
        .speech
        .utterances()
        .iter()
        .any(|u| u.contains("Recovered")));
}

#[tokio::test]
async fn failed_restart_is_reported_as_unsuccessful() {
    let h = harness(
        Advice {
            action: HealAction::RestartBrain,
            confidence: 1.0,
            explanation: String::new(),
        },
        true,
        &[],
    );

    assert!(!h.arbiter.execute(HealAction::RestartBrain).await);
    assert_eq!(h.restarter.calls(), 1);
    assert!(h.speech.utterances().is_empty());
}

#[tokio::test]
async fn heal_records_the_decision_once_per_cooldown() {
    let h = harness(
        Advice {
            action: HealAction::Observe,
            confidence: 0.6,
            explanation: String::new(),
        },
        false,
        &[],
    );

    let first = h.arbiter.heal("queue_overflow").await;
    assert!(first.is_some());
    assert_eq!(first.unwrap().action, HealAction::Observe);
    assert_eq!(h.log.len(), 1);

    // Same symptom inside the cooldown window is suppressed.
    assert!(h.arbiter.heal("queue_overflow").await.is_none());
    assert_eq!(h.log.len(), 1);

    // A different symptom has its own cooldown.
    assert!(h.arbiter.heal("memory_pressure").await.is_some());
    assert_eq!(h.log.len(), 2);
}

#[tokio::test]
async fn coincident_symptoms_are_each_detected_and_healed() {
    let h = harness(
        Advice {
            action: HealAction::Observe,
            confidence: 0.9,
            explanation: String::new(),
        },
        false,
        &[],
    );
    // Memory pressure and queue overflow in the same tick.
    h.probe.set(10.0, 95.0);
    for i in 0..26 {
        h.ctx.channel.push(CommandSource::Text, format!("stale {i}"));
    }

    let symptoms = h.arbiter.symptoms();
    assert!(symptoms.contains(&"memory_pressure"));
    assert!(symptoms.contains(&"queue_overflow"));

    for symptom in symptoms {
        assert!(h.arbiter.heal(symptom).await.is_some());
    }
    assert_eq!(h.log.len(), 2);
}

#[tokio::test]
async fn low_confidence_explanation_is_spoken() {
    let h = harness(
        Advice {
            action: HealAction::Observe,
            confidence: 0.6,
            explanation: "Readings look marginal, watching for now.".to_string(),
        },
        false,
        &[],
    );

    // 0.6 * 0.5 prior lands below the announcement bar.
    let record = h.arbiter.heal("memory_pressure").await.unwrap();
    assert!(record.confidence < 0.5);
    assert!(h
        .speech
        .utterances()
        .iter()
        .any(|u| u.contains("Readings look marginal")));
}
