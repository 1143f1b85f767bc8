//! Leadership Gate: the core only *observes* leader election (some other
//! layer — e.g. a cross-tab election in the host application — decides who
//! leads); this module just makes sure exactly the leading instance runs
//! the background fibers that touch shared resources (the transfer
//! executor, the event stream, the heartbeat, the connectivity loop).

use std::future::Future;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Gates a set of background fibers on an externally-driven leadership
/// signal. `true` means "I am the leader of this multi-tab/multi-process
/// session right now".
pub struct LeadershipGate {
    leader: watch::Receiver<bool>,
}

impl LeadershipGate {
    #[must_use]
    pub fn new(leader: watch::Receiver<bool>) -> Self {
        Self { leader }
    }

    #[must_use]
    pub fn is_leader(&self) -> bool {
        *self.leader.borrow()
    }

    /// Runs the fibers spawned by `spawn_fibers` for as long as leadership
    /// holds; calls `on_acquire` each time leadership is (re)gained, before
    /// spawning, and `on_lose` each time it's relinquished, after the
    /// spawned handles are aborted. Returns once the leadership signal's
    /// sender is dropped.
    pub async fn supervise<OnAcquire, OnAcquireFut, OnLose, OnLoseFut, SpawnFibers, SpawnFut>(
        mut self,
        mut on_acquire: OnAcquire,
        mut on_lose: OnLose,
        mut spawn_fibers: SpawnFibers,
    ) where
        OnAcquire: FnMut() -> OnAcquireFut,
        OnAcquireFut: Future<Output = ()>,
        OnLose: FnMut() -> OnLoseFut,
        OnLoseFut: Future<Output = ()>,
        SpawnFibers: FnMut() -> SpawnFut,
        SpawnFut: Future<Output = Vec<JoinHandle<()>>>,
    {
        loop {
            if *self.leader.borrow() {
                info!("leadership acquired; starting sync fibers");
                on_acquire().await;
                let handles = spawn_fibers().await;

                loop {
                    if !*self.leader.borrow() {
                        break;
                    }
                    if self.leader.changed().await.is_err() {
                        for handle in handles {
                            handle.abort();
                        }
                        on_lose().await;
                        return;
                    }
                }

                info!("leadership lost; stopping sync fibers");
                for handle in handles {
                    handle.abort();
                }
                on_lose().await;
            } else if self.leader.changed().await.is_err() {
                return;
            }
        }
    }
}
