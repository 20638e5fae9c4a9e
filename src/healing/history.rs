use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Fixed remediation action set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealAction {
    Observe,
    ClearQueue,
    RestartBrain,
}

impl HealAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealAction::Observe => "observe",
            HealAction::ClearQueue => "clear_queue",
            HealAction::RestartBrain => "restart_brain",
        }
    }
}

/// Compact view of a past decision embedded in snapshots handed to the
/// advisor. Kept flat so persisted history does not nest unboundedly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RecentOutcome {
    pub action: HealAction,
    pub confidence: f64,
    pub success: bool,
}

/// System state at the moment a remediation decision was made. Produced
/// fresh per decision, persisted only inside its DecisionRecord.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub symptom: String,
    pub cpu_pct: f32,
    pub mem_pct: f32,
    pub queue_depth: usize,
    pub heartbeat_age_secs: f64,
    #[serde(default)]
    pub recent: Vec<RecentOutcome>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub at: DateTime<Utc>,
    pub snapshot: HealthSnapshot,
    pub action: HealAction,
    pub confidence: f64,
    pub success: bool,
}

/// Append-only decision history: a bounded ring persisted to disk so the
/// success-rate prior survives restarts.
pub struct DecisionLog {
    path: PathBuf,
    cap: usize,
    records: Mutex<VecDeque<DecisionRecord>>,
}

impl DecisionLog {
    /// Corrupt or missing history resets to empty (prior back to 0.5).
    pub fn load(path: PathBuf, cap: usize) -> Self {
        let records = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<Vec<DecisionRecord>>(&raw) {
                Ok(mut loaded) => {
                    if loaded.len() > cap {
                        loaded.drain(..loaded.len() - cap);
                    }
                    loaded.into()
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "decision history corrupt, starting empty");
                    VecDeque::new()
                }
            },
            Err(_) => VecDeque::new(),
        };
        Self {
            path,
            cap: cap.max(1),
            records: Mutex::new(records),
        }
    }

    pub fn append(&self, record: DecisionRecord) {
        let snapshot: Vec<DecisionRecord> = {
            let mut records = self.lock();
            records.push_back(record);
            while records.len() > self.cap {
                records.pop_front();
            }
            records.iter().cloned().collect()
        };
        self.persist(&snapshot);
    }

    /// Empirical success rate for an action; 0.5 prior with no history.
    pub fn success_rate(&self, action: HealAction) -> f64 {
        let records = self.lock();
        let relevant: Vec<_> = records.iter().filter(|r| r.action == action).collect();
        if relevant.is_empty() {
            return 0.5;
        }
        let successes = relevant.iter().filter(|r| r.success).count();
        successes as f64 / relevant.len() as f64
    }

    pub fn recent_outcomes(&self, n: usize) -> Vec<RecentOutcome> {
        let records = self.lock();
        records
            .iter()
            .rev()
            .take(n)
            .map(|r| RecentOutcome {
                action: r.action,
                confidence: r.confidence,
                success: r.success,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn persist(&self, records: &[DecisionRecord]) {
        match serde_json::to_string_pretty(records) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "decision history flush failed");
                }
            }
            Err(e) => warn!(error = %e, "decision history serialization failed"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<DecisionRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}
