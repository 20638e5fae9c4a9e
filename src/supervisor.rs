use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info};

/// Cooperative lifecycle flag for the dispatch worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Stopping,
    Stopped,
}

/// Published on a watch channel. The epoch increments on every start so
/// an abandoned worker that missed the `Stopping` window still notices it
/// has been superseded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    pub state: RunState,
    pub epoch: u64,
}

impl Lifecycle {
    pub fn stopped() -> Self {
        Self {
            state: RunState::Stopped,
            epoch: 0,
        }
    }

    pub fn channel() -> (watch::Sender<Lifecycle>, watch::Receiver<Lifecycle>) {
        watch::channel(Self::stopped())
    }
}

pub type DispatchFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Grace interval between signalling `Stopping` and spawning the
/// replacement worker.
pub const RESTART_GRACE: Duration = Duration::from_millis(500);

/// Narrow restart capability handed to the healing arbiter, keeping the
/// arbiter -> supervisor dependency one-directional.
#[async_trait]
pub trait Restarter: Send + Sync {
    async fn restart_dispatch(&self) -> anyhow::Result<()>;
}

/// Owns the dispatch worker. The only component allowed to start or stop
/// it; the start/restart path is serialized by an internal lock so at
/// most one worker is live at any time.
pub struct Supervisor {
    factory: Box<dyn Fn(u64) -> DispatchFuture + Send + Sync>,
    lifecycle: watch::Sender<Lifecycle>,
    worker: Mutex<Option<JoinHandle<()>>>,
    crashes: Arc<AtomicU64>,
    grace: Duration,
}

impl Supervisor {
    pub fn new<F>(factory: F, lifecycle: watch::Sender<Lifecycle>) -> Self
    where
        F: Fn(u64) -> DispatchFuture + Send + Sync + 'static,
    {
        Self {
            factory: Box::new(factory),
            lifecycle,
            worker: Mutex::new(None),
            crashes: Arc::new(AtomicU64::new(0)),
            grace: RESTART_GRACE,
        }
    }

    /// Spawns the dispatch worker unless one is already live. The worker
    /// future is wrapped so a crash (error return or panic) is recorded
    /// and the lifecycle flag cleared; the wrapper never propagates the
    /// failure back to the caller of `start`.
    ///
    /// The only reportable failure is the inability to spawn at all.
    pub fn start(&self) -> anyhow::Result<()> {
        let mut worker = self.lock_worker();

        let lc = *self.lifecycle.borrow();
        let live = worker.as_ref().is_some_and(|h| !h.is_finished());
        if live && lc.state == RunState::Running {
            return Ok(());
        }

        let runtime = tokio::runtime::Handle::try_current()
            .context("no async runtime available to spawn the dispatch worker")?;

        let epoch = lc.epoch + 1;
        self.lifecycle.send_replace(Lifecycle {
            state: RunState::Running,
            epoch,
        });

        let fut = (self.factory)(epoch);
        let lifecycle = self.lifecycle.clone();
        let crashes = Arc::clone(&self.crashes);

        let handle = runtime.spawn(async move {
            // Inner spawn so a panic surfaces as a JoinError here instead
            // of tearing down the wrapper.
            let inner = tokio::spawn(fut);
            match inner.await {
                Ok(Ok(())) => info!(epoch, "dispatch worker exited cleanly"),
                Ok(Err(e)) => {
                    crashes.fetch_add(1, Ordering::Relaxed);
                    error!(epoch, error = %e, "dispatch worker crashed");
                }
                Err(join) => {
                    crashes.fetch_add(1, Ordering::Relaxed);
                    error!(epoch, error = %join, "dispatch worker panicked");
                }
            }
            // Clear the flag only if this worker is still the current one.
            lifecycle.send_if_modified(|lc| {
                if lc.epoch == epoch && lc.state != RunState::Stopped {
                    lc.state = RunState::Stopped;
                    true
                } else {
                    false
                }
            });
        });

        *worker = Some(handle);
        info!(epoch, "dispatch worker started");
        Ok(())
    }

    /// Signals the current worker to stop, waits the grace interval, then
    /// starts a replacement regardless of whether the old worker fully
    /// exited. The old worker is abandoned, not force-killed: it observes
    /// the epoch change at its next bounded wait and holds no shared
    /// mutable state past its lock scopes.
    pub async fn restart(&self) -> anyhow::Result<()> {
        self.lifecycle
            .send_modify(|lc| lc.state = RunState::Stopping);
        tokio::time::sleep(self.grace).await;
        self.start()
    }

    /// Cooperative stop without a replacement.
    pub fn shutdown(&self) {
        self.lifecycle
            .send_modify(|lc| lc.state = RunState::Stopping);
    }

    pub fn is_running(&self) -> bool {
        let live = self
            .lock_worker()
            .as_ref()
            .is_some_and(|h| !h.is_finished());
        live && self.lifecycle.borrow().state != RunState::Stopped
    }

    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    pub fn crash_count(&self) -> u64 {
        self.crashes.load(Ordering::Relaxed)
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

#[async_trait]
impl Restarter for Arc<Supervisor> {
    async fn restart_dispatch(&self) -> anyhow::Result<()> {
        self.restart().await
    }
}
