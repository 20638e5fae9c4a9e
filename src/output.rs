use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::Duration;
use tracing::{info, warn};

/// Serialized spoken output. Utterances play one at a time in submission
/// order; `cancel` stops the active utterance and discards the backlog.
#[async_trait]
pub trait SpeechSink: Send + Sync {
    async fn speak(&self, text: &str);
    async fn cancel(&self);
    /// Bounded wait for the sink to drain. Returns false on timeout.
    async fn wait_idle(&self, limit: Duration) -> bool;
}

/// Optional presentation egress: individual tokens followed by an
/// end-of-reply sentinel. Voice-only mode simply attaches no sink.
pub trait TokenSink: Send + Sync {
    fn token(&self, token: &str);
    fn end(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    Token(String),
    End,
}

/// Token sink backed by an unbounded channel, for dashboards and tests.
pub struct ChannelTokenSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelTokenSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TokenSink for ChannelTokenSink {
    fn token(&self, token: &str) {
        let _ = self.tx.send(SinkEvent::Token(token.to_string()));
    }

    fn end(&self) {
        let _ = self.tx.send(SinkEvent::End);
    }
}

struct SpeechShared {
    queue: Mutex<VecDeque<String>>,
    wake: Notify,
    stop_current: Mutex<Option<oneshot::Sender<()>>>,
    idle_tx: watch::Sender<bool>,
}

impl SpeechShared {
    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<String>> {
        self.queue.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn take_stop(&self) -> Option<oneshot::Sender<()>> {
        self.stop_current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take()
    }

    fn set_stop(&self, stop: oneshot::Sender<()>) {
        *self
            .stop_current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(stop);
    }
}

/// Speech sink that shells out to an external synthesis program, one
/// process per utterance, killed on cancellation.
pub struct ProcessSpeech {
    shared: Arc<SpeechShared>,
}

impl ProcessSpeech {
    pub fn spawn(program: &str) -> Arc<Self> {
        let (idle_tx, _) = watch::channel(true);
        let shared = Arc::new(SpeechShared {
            queue: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            stop_current: Mutex::new(None),
            idle_tx,
        });
        let worker_shared = Arc::clone(&shared);
        let program = program.to_string();
        tokio::spawn(async move {
            playback_worker(worker_shared, program).await;
        });
        Arc::new(Self { shared })
    }
}

async fn playback_worker(shared: Arc<SpeechShared>, program: String) {
    loop {
        // The idle flag flips to true only while the lock proves the
        // queue empty; speak() flips it back under the same lock, so a
        // waiter can never observe idle with an utterance queued.
        let next = {
            let mut queue = shared.lock_queue();
            let popped = queue.pop_front();
            if popped.is_none() {
                let _ = shared.idle_tx.send(true);
            }
            popped
        };
        let Some(text) = next else {
            shared.wake.notified().await;
            continue;
        };

        let (stop_tx, mut stop_rx) = oneshot::channel();
        shared.set_stop(stop_tx);

        match tokio::process::Command::new(&program)
            .arg(&text)
            .kill_on_drop(true)
            .spawn()
        {
            Ok(mut child) => {
                tokio::select! {
                    _ = child.wait() => {}
                    _ = &mut stop_rx => {
                        let _ = child.kill().await;
                    }
                }
            }
            // Synthesis failure is transient I/O, never fatal to a turn.
            Err(e) => warn!(program = %program, error = %e, "speech program failed to spawn"),
        }
        shared.take_stop();
    }
}

#[async_trait]
impl SpeechSink for ProcessSpeech {
    async fn speak(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        {
            let mut queue = self.shared.lock_queue();
            let _ = self.shared.idle_tx.send(false);
            queue.push_back(text.to_string());
        }
        self.shared.wake.notify_one();
    }

    async fn cancel(&self) {
        self.shared.lock_queue().clear();
        if let Some(stop) = self.shared.take_stop() {
            let _ = stop.send(());
        }
    }

    async fn wait_idle(&self, limit: Duration) -> bool {
        let mut idle = self.shared.idle_tx.subscribe();
        tokio::time::timeout(limit, async {
            loop {
                if *idle.borrow() {
                    return;
                }
                if idle.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }
}

/// Sink for deployments without audio output: utterances go to the log.
pub struct NullSpeech;

#[async_trait]
impl SpeechSink for NullSpeech {
    async fn speak(&self, text: &str) {
        info!(utterance = %text, "speech (muted)");
    }

    async fn cancel(&self) {}

    async fn wait_idle(&self, _limit: Duration) -> bool {
        true
    }
}

/// Test double that records utterances and cancellations.
pub struct RecordingSpeech {
    utterances: Mutex<Vec<String>>,
    cancels: AtomicUsize,
}

impl RecordingSpeech {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            utterances: Mutex::new(Vec::new()),
            cancels: AtomicUsize::new(0),
        })
    }

    pub fn utterances(&self) -> Vec<String> {
        self.utterances
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    pub fn cancel_count(&self) -> usize {
        self.cancels.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SpeechSink for RecordingSpeech {
    async fn speak(&self, text: &str) {
        self.utterances
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .push(text.to_string());
    }

    async fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::Relaxed);
    }

    async fn wait_idle(&self, _limit: Duration) -> bool {
        true
    }
}
