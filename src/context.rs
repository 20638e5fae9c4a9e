use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::command::CommandChannel;
use crate::config::Config;
use crate::supervisor::Lifecycle;

/// Liveness signal beaten by the dispatcher (per iteration and per
/// streamed token) and read by the healing arbiter.
#[derive(Clone)]
pub struct Heartbeat {
    started: Instant,
    last_ms: Arc<AtomicU64>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn beat(&self) {
        let elapsed = self.started.elapsed().as_millis() as u64;
        self.last_ms.store(elapsed, Ordering::Relaxed);
    }

    pub fn age(&self) -> Duration {
        let now = self.started.elapsed().as_millis() as u64;
        let last = self.last_ms.load(Ordering::Relaxed);
        Duration::from_millis(now.saturating_sub(last))
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

/// Re-armable interrupt signal. `raise` cancels the token armed for the
/// reply currently being produced; each reply arms a fresh token so one
/// interruption never bleeds into the next turn.
#[derive(Clone)]
pub struct InterruptFlag {
    current: Arc<Mutex<CancellationToken>>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(CancellationToken::new())),
        }
    }

    pub fn raise(&self) {
        self.guard().cancel();
    }

    pub fn is_raised(&self) -> bool {
        self.guard().is_cancelled()
    }

    /// Replaces the active token and returns a handle for this reply.
    pub fn arm(&self) -> CancellationToken {
        let mut guard = self
            .current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        *guard = CancellationToken::new();
        guard.clone()
    }

    fn guard(&self) -> CancellationToken {
        self.current
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }
}

impl Default for InterruptFlag {
    fn default() -> Self {
        Self::new()
    }
}

pub const EXIT_OK: i32 = 0;
/// Consumed by the outer OS-level supervisor: relaunch immediately.
pub const EXIT_RESTART: i32 = 42;

/// Process-wide exit request. First request wins.
#[derive(Clone)]
pub struct ExitRequest {
    token: CancellationToken,
    code: Arc<AtomicI32>,
}

impl ExitRequest {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
            code: Arc::new(AtomicI32::new(EXIT_OK)),
        }
    }

    pub fn request(&self, code: i32) {
        if !self.token.is_cancelled() {
            self.code.store(code, Ordering::SeqCst);
            self.token.cancel();
        }
    }

    pub fn requested(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn code(&self) -> i32 {
        self.code.load(Ordering::SeqCst)
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }

    /// Child token for background workers that should wind down on exit.
    pub fn child_token(&self) -> CancellationToken {
        self.token.child_token()
    }
}

impl Default for ExitRequest {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared handles threaded through every component constructor. Replaces
/// the module-level globals of earlier revisions of this system; nothing
/// here is ambient.
pub struct RuntimeContext {
    pub config: Arc<Config>,
    pub channel: CommandChannel,
    pub heartbeat: Heartbeat,
    pub interrupt: InterruptFlag,
    pub exit: ExitRequest,
    pub lifecycle: watch::Receiver<Lifecycle>,
}

impl RuntimeContext {
    pub fn new(config: Arc<Config>, lifecycle: watch::Receiver<Lifecycle>) -> Self {
        let channel = CommandChannel::new(config.channel_capacity);
        Self {
            config,
            channel,
            heartbeat: Heartbeat::new(),
            interrupt: InterruptFlag::new(),
            exit: ExitRequest::new(),
            lifecycle,
        }
    }
}
