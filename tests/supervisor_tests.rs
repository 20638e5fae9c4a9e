use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use vigil::supervisor::{Lifecycle, RunState, Supervisor};

/// Worker that runs until its epoch is superseded or a stop is signalled.
fn cooperative_factory(
    spawns: Arc<AtomicU64>,
    lifecycle: tokio::sync::watch::Receiver<Lifecycle>,
) -> impl Fn(u64) -> vigil::supervisor::DispatchFuture + Send + Sync + 'static {
    move |epoch| {
        spawns.fetch_add(1, Ordering::SeqCst);
        let mut lifecycle = lifecycle.clone();
        Box::pin(async move {
            loop {
                let lc = *lifecycle.borrow_and_update();
                if lc.epoch != epoch || lc.state != RunState::Running {
                    return Ok(());
                }
                if lifecycle.changed().await.is_err() {
                    return Ok(());
                }
            }
        })
    }
}

#[tokio::test]
async fn start_is_idempotent_while_running() {
    let (tx, rx) = Lifecycle::channel();
    let spawns = Arc::new(AtomicU64::new(0));
    let supervisor = Supervisor::new(cooperative_factory(Arc::clone(&spawns), rx), tx);

    supervisor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    supervisor.start().unwrap();
    supervisor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(spawns.load(Ordering::SeqCst), 1);
    assert!(supervisor.is_running());
}

#[tokio::test]
async fn restart_bumps_epoch_and_respawns() {
    let (tx, rx) = Lifecycle::channel();
    let spawns = Arc::new(AtomicU64::new(0));
    let supervisor = Supervisor::new(cooperative_factory(Arc::clone(&spawns), rx), tx);
    let mut lifecycle = supervisor.subscribe();

    supervisor.start().unwrap();
    supervisor.restart().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let lc = *lifecycle.borrow_and_update();
    assert_eq!(lc.epoch, 2);
    assert_eq!(lc.state, RunState::Running);
    assert_eq!(spawns.load(Ordering::SeqCst), 2);
    assert!(supervisor.is_running());
}

#[tokio::test]
async fn crashing_worker_is_recorded_and_clears_the_flag() {
    let (tx, _rx) = Lifecycle::channel();
    let supervisor =
        Supervisor::new(|_| Box::pin(async { anyhow::bail!("simulated crash") }), tx);

    supervisor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!supervisor.is_running());
    assert_eq!(supervisor.crash_count(), 1);

    // The supervisor can start a fresh worker after a crash.
    supervisor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(supervisor.crash_count(), 2);
}

#[tokio::test]
async fn panicking_worker_counts_as_a_crash() {
    let (tx, _rx) = Lifecycle::channel();
    let supervisor = Supervisor::new(
        |_| {
            Box::pin(async {
                panic!("worker blew up");
            })
        },
        tx,
    );

    supervisor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!supervisor.is_running());
    assert_eq!(supervisor.crash_count(), 1);
}

#[tokio::test]
async fn shutdown_stops_without_replacement() {
    let (tx, rx) = Lifecycle::channel();
    let spawns = Arc::new(AtomicU64::new(0));
    let supervisor = Supervisor::new(cooperative_factory(Arc::clone(&spawns), rx), tx);

    supervisor.start().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    supervisor.shutdown();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!supervisor.is_running());
    assert_eq!(spawns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn superseded_worker_exits_on_epoch_change() {
    let (tx, rx) = Lifecycle::channel();
    let spawns = Arc::new(AtomicU64::new(0));
    let supervisor = Supervisor::new(cooperative_factory(Arc::clone(&spawns), rx), tx);

    supervisor.start().unwrap();
    supervisor.restart().await.unwrap();
    supervisor.restart().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Three spawns total, exactly one still live.
    assert_eq!(spawns.load(Ordering::SeqCst), 3);
    assert!(supervisor.is_running());
    assert_eq!(supervisor.subscribe().borrow().epoch, 3);
}
