use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::debug;

/// Where a command entered the system. Informational only; dispatch
/// semantics do not depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandSource {
    Voice,
    Text,
    Api,
}

#[derive(Debug, Clone)]
pub struct Command {
    pub source: CommandSource,
    pub text: String,
    pub received_at: Instant,
}

impl Command {
    pub fn new(source: CommandSource, text: impl Into<String>) -> Self {
        Self {
            source,
            text: text.into(),
            received_at: Instant::now(),
        }
    }
}

/// Bounded mailbox between producers and the single dispatch consumer.
///
/// A plain queue under a mutex rather than an mpsc channel: the healing
/// arbiter must be able to observe depth and drain pending commands from
/// outside the consumer, which channel receivers do not allow.
///
/// `push` never blocks. A full queue drops the command and counts it.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<ChannelInner>,
}

struct ChannelInner {
    queue: Mutex<VecDeque<Command>>,
    notify: Notify,
    capacity: usize,
    dropped: AtomicU64,
}

impl CommandChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity: capacity.max(1),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Returns false when the queue is full and the command was dropped.
    pub fn push(&self, source: CommandSource, text: impl Into<String>) -> bool {
        let cmd = Command::new(source, text);
        {
            let mut queue = lock(&self.inner.queue);
            if queue.len() >= self.inner.capacity {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(depth = queue.len(), "command channel full, dropping input");
                return false;
            }
            queue.push_back(cmd);
        }
        self.inner.notify.notify_one();
        true
    }

    pub fn try_pop(&self) -> Option<Command> {
        lock(&self.inner.queue).pop_front()
    }

    /// Bounded pop. The short timeout is what lets the consumer observe
    /// shutdown signals without busy-spinning.
    pub async fn pop_timeout(&self, wait: Duration) -> Option<Command> {
        tokio::time::timeout(wait, async {
            loop {
                if let Some(cmd) = self.try_pop() {
                    return cmd;
                }
                self.inner.notify.notified().await;
            }
        })
        .await
        .ok()
    }

    pub fn depth(&self) -> usize {
        lock(&self.inner.queue).len()
    }

    /// Discards all pending commands; returns how many were removed.
    pub fn drain(&self) -> usize {
        let mut queue = lock(&self.inner.queue);
        let removed = queue.len();
        queue.clear();
        removed
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

// A producer holding the lock cannot panic mid-mutation, but a poisoned
// queue must never take the dispatcher down with it.
fn lock(queue: &Mutex<VecDeque<Command>>) -> std::sync::MutexGuard<'_, VecDeque<Command>> {
    queue.lock().unwrap_or_else(|poison| poison.into_inner())
}
