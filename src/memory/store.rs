use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::MemoryConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub text: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Long-term fact store. Append-only, capped, with periodic durable
/// flushes off the dispatch path.
///
/// Absolute contract: no public entry point may raise or stall. Internal
/// failure yields an empty or neutral result; this store can never be
/// the reason the dispatcher dies.
pub struct MemoryStore {
    path: PathBuf,
    max_records: usize,
    flush_every: Duration,
    records: Mutex<Vec<MemoryRecord>>,
    dirty: AtomicBool,
}

impl MemoryStore {
    /// Loads persisted records; a corrupt or missing file degrades to an
    /// empty store rather than failing startup.
    pub fn open(config: &MemoryConfig) -> Arc<Self> {
        let records = match std::fs::read_to_string(&config.path) {
            Ok(raw) => match serde_json::from_str::<Vec<MemoryRecord>>(&raw) {
                Ok(mut loaded) => {
                    if loaded.len() > config.max_records {
                        loaded.drain(..loaded.len() - config.max_records);
                    }
                    loaded
                }
                Err(e) => {
                    warn!(path = %config.path.display(), error = %e, "memory file corrupt, starting empty");
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };

        Arc::new(Self {
            path: config.path.clone(),
            max_records: config.max_records.max(1),
            flush_every: Duration::from_secs(config.flush_secs.max(1)),
            records: Mutex::new(records),
            dirty: AtomicBool::new(false),
        })
    }

    /// Background writer: persists on a fixed cadence while dirty, and
    /// once more on shutdown. Writes are deliberately not per-add.
    pub fn start_flusher(self: &Arc<Self>, shutdown: CancellationToken) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(store.flush_every) => {
                        if store.dirty.swap(false, Ordering::AcqRel) {
                            store.flush();
                        }
                    }
                    _ = shutdown.cancelled() => {
                        store.flush();
                        return;
                    }
                }
            }
        });
    }

    /// Non-blocking append. Empty text is ignored; the oldest record is
    /// evicted once the cap is reached. Never raises.
    pub fn add(&self, text: &str, tags: &[&str]) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        let record = MemoryRecord {
            text: text.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            created_at: Utc::now(),
        };
        let mut records = self.lock();
        records.push(record);
        if records.len() > self.max_records {
            let overflow = records.len() - self.max_records;
            records.drain(..overflow);
        }
        drop(records);
        self.dirty.store(true, Ordering::Release);
    }

    /// Keyword-containment search, most-recent-first. Returns an empty
    /// vec on an empty query, an empty store, or zero matches.
    pub fn search(&self, query: &str, limit: usize) -> Vec<MemoryRecord> {
        let query = query.trim().to_lowercase();
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }
        let records = self.lock();
        let mut hits = Vec::new();
        for record in records.iter().rev() {
            if record.text.to_lowercase().contains(&query) {
                hits.push(record.clone());
                if hits.len() >= limit {
                    break;
                }
            }
        }
        hits
    }

    /// Exact match on normalized text, used to deduplicate before a
    /// memorize write.
    pub fn contains_text(&self, text: &str) -> bool {
        let needle = normalize(text);
        if needle.is_empty() {
            return false;
        }
        self.lock().iter().any(|r| normalize(&r.text) == needle)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clears everything and persists the empty state immediately.
    pub fn clear(&self) {
        self.lock().clear();
        self.flush();
    }

    /// Durable write of the current record list. Errors are logged, never
    /// propagated.
    pub fn flush(&self) {
        let snapshot = self.lock().clone();
        match serde_json::to_string_pretty(&snapshot) {
            Ok(json) => {
                if let Err(e) = std::fs::write(&self.path, json) {
                    warn!(path = %self.path.display(), error = %e, "memory flush failed");
                } else {
                    debug!(records = snapshot.len(), "memory flushed");
                }
            }
            Err(e) => warn!(error = %e, "memory serialization failed"),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MemoryRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
