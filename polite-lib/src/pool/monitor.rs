use log::{debug, warn};
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::listener::guarded;
use crate::scheduler::Shared;
use crate::{Listener, ShardId};

/// Periodically reports spare capacity to the [`Listener`].
///
/// Every `monitor_interval` the monitor calls
/// [`Listener::on_pool_capacity_available`] if fewer than `max_concurrency`
/// workers are alive, and [`Listener::on_worker_queue_available`] for every
/// worker whose queue has free slots.
///
/// Callbacks run on the monitor task after the registry lock has been
/// released, so they may schedule new tasks.
/// Dropping the monitor stops it; use [`Monitor::stop`] to also wait for it.
#[derive(Debug)]
pub struct Monitor {
    shutdown: Arc<Notify>,
    handle: Option<JoinHandle<()>>,
}

impl Monitor {
    pub(crate) fn spawn<L: Listener>(shared: Arc<Shared<L>>) -> Self {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);
        let period = shared.config.monitor_interval;

        let handle = tokio::spawn(async move {
            debug!("Monitor started, reporting every {period:?}");
            loop {
                report_capacity(&shared);
                tokio::select! {
                    () = signal.notified() => break,
                    () = tokio::time::sleep(period) => {}
                }
            }
            debug!("Monitor stopped");
        });

        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the monitor and wait for its task to finish
    pub async fn stop(mut self) {
        self.shutdown.notify_one();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                warn!("Monitor task failed: {e}");
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        // `notify_one` stores a permit, so a monitor that is currently
        // reporting still sees it on its next wait
        self.shutdown.notify_one();
    }
}

/// Snapshot spare capacity under the write lock, then notify without it
fn report_capacity<L: Listener>(shared: &Shared<L>) {
    let queue_length = shared.config.queue_length;
    let (spare_workers, spare_queues) = {
        let workers = shared.registry.write();
        let spare_workers = shared.config.max_concurrency.saturating_sub(workers.len());
        let spare_queues: Vec<(ShardId, usize)> = workers
            .iter()
            .filter_map(|(shard, worker)| {
                let available = worker.available().min(queue_length);
                (available > 0).then_some((*shard, available))
            })
            .collect();
        (spare_workers, spare_queues)
    };

    let listener = &shared.listener;
    if spare_workers > 0 {
        guarded("Monitor", || listener.on_pool_capacity_available(spare_workers));
    }
    for (shard, available) in spare_queues {
        guarded("Monitor", || listener.on_worker_queue_available(shard, available));
    }
}
