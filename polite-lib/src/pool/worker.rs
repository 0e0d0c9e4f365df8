use bytes::Bytes;
use http::StatusCode;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use url::Url;

use super::registry::{RejectReason, Rejected, Registry};
use super::stats::{WorkerCounters, WorkerStat};
use crate::listener::guarded;
use crate::scheduler::Shared;
use crate::transport::Fetched;
use crate::types::Delivery;
use crate::{Listener, ShardId, Task};

/// The registry's view of a worker: the sending side of its queue plus
/// its counters.
#[derive(Debug)]
pub(crate) struct WorkerHandle<P> {
    id: u64,
    queue: mpsc::Sender<Task<P>>,
    counters: Arc<Mutex<WorkerCounters>>,
    created: Instant,
}

impl<P> WorkerHandle<P> {
    pub(crate) fn new(id: u64, queue: mpsc::Sender<Task<P>>) -> Self {
        Self {
            id,
            queue,
            counters: Arc::default(),
            created: Instant::now(),
        }
    }

    pub(crate) const fn id(&self) -> u64 {
        self.id
    }

    /// Enqueue without blocking
    pub(crate) fn submit(&self, task: Task<P>) -> Result<(), Rejected<P>> {
        self.queue.try_send(task).map_err(|e| match e {
            TrySendError::Full(task) => Rejected::new(task, RejectReason::QueueFull),
            TrySendError::Closed(task) => Rejected::new(task, RejectReason::WorkerGone),
        })
    }

    /// Number of tasks waiting in the queue
    pub(crate) fn queued(&self) -> usize {
        self.queue.max_capacity() - self.queue.capacity()
    }

    /// Free slots in the queue
    pub(crate) fn available(&self) -> usize {
        self.queue.capacity()
    }

    pub(crate) fn stat(&self, shard: ShardId) -> WorkerStat {
        self.counters
            .lock()
            .snapshot(shard, self.queued(), self.created.elapsed())
    }
}

/// A worker draining the queue of one shard.
///
/// It processes one task at a time, pauses for the site interval after each
/// one and removes itself from the registry as soon as its queue is empty.
pub(crate) struct Worker<L: Listener> {
    id: u64,
    /// The task that created this worker
    first: Option<Task<L::Payload>>,
    queue: mpsc::Receiver<Task<L::Payload>>,
    registered: bool,
    fetcher: Fetcher<L>,
}

/// The part of a worker that fetches and reports, borrowed across `.await`
struct Fetcher<L: Listener> {
    shard: ShardId,
    counters: Arc<Mutex<WorkerCounters>>,
    shared: Arc<Shared<L>>,
}

impl<L: Listener> Worker<L> {
    /// Create a worker owning `task`, together with the handle to register.
    ///
    /// The worker does nothing until [`Self::start`] is called, which must
    /// happen after the handle is registered and the registry lock released.
    pub(crate) fn new(
        shared: &Arc<Shared<L>>,
        id: u64,
        task: Task<L::Payload>,
    ) -> (WorkerHandle<L::Payload>, Self) {
        let (sender, receiver) = mpsc::channel(shared.config.queue_capacity());
        let handle = WorkerHandle::new(id, sender);
        let worker = Self {
            id,
            fetcher: Fetcher {
                shard: task.shard(),
                counters: Arc::clone(&handle.counters),
                shared: Arc::clone(shared),
            },
            first: Some(task),
            queue: receiver,
            registered: true,
        };
        (handle, worker)
    }

    /// Run the worker on the current runtime.
    ///
    /// If the runtime is shutting down the worker is dropped right away and
    /// deregisters itself, so this must not be called with the registry
    /// lock held.
    pub(crate) fn start(self) {
        tokio::spawn(self.run());
    }

    async fn run(mut self) {
        let shard = self.fetcher.shard;
        info!("Worker {shard} started");
        let interval = self.fetcher.shared.config.site_interval;

        while let Some(task) = self.next_task() {
            self.fetcher.shared.registry.notify_capacity();
            self.fetcher.process(task).await;
            if !interval.is_zero() {
                tokio::time::sleep(interval).await;
            }
        }

        let fetched = self.fetcher.counters.lock().fetched();
        info!("Worker {shard} finished after {fetched} fetches");
    }

    /// Take the next task, or deregister if there is none.
    fn next_task(&mut self) -> Option<Task<L::Payload>> {
        if let Some(task) = self.first.take() {
            return Some(task);
        }
        if let Ok(task) = self.queue.try_recv() {
            return Some(task);
        }

        // Admission enqueues under the read lock, so with the write lock
        // held the queue cannot grow anymore.
        let registry = &self.fetcher.shared.registry;
        let mut workers = registry.write();
        if let Ok(task) = self.queue.try_recv() {
            return Some(task);
        }
        Registry::<L::Payload>::remove_locked(&mut workers, self.fetcher.shard, self.id);
        self.registered = false;
        drop(workers);

        registry.notify_capacity();
        None
    }
}

impl<L: Listener> Fetcher<L> {
    async fn process(&self, task: Task<L::Payload>) {
        let usable = task.has_usable_address();
        let (url, address, delivery) = task.into_parts();

        if !usable {
            debug!(
                "Worker {}: skipping {url} with unusable address {address:?}",
                self.shard
            );
            self.report_failure(&url, &address, None, delivery);
            return;
        }

        debug!("Worker {}: fetching {url} ({address})", self.shard);
        match self.shared.transport.fetch(&url).await {
            Ok(fetched) => {
                self.counters
                    .lock()
                    .record(fetched.connect_time, fetched.fetch_time);
                self.report_success(&url, &address, fetched, delivery);
            }
            Err(e) => {
                warn!("Worker {}: failed to fetch {url}: {e}", self.shard);
                self.report_failure(&url, &address, e.status(), delivery);
            }
        }
    }

    fn report_success(
        &self,
        url: &Url,
        address: &str,
        fetched: Fetched,
        delivery: Delivery<L::Payload>,
    ) {
        match delivery {
            Delivery::Waiter(reply) => self.reply(url, reply, Some(fetched.body)),
            Delivery::Listener(payload) => {
                let listener = &self.shared.listener;
                guarded(&format!("Worker {}", self.shard), || {
                    listener.on_success(
                        url,
                        address,
                        fetched.status,
                        fetched.body,
                        fetched.headers,
                        payload,
                    );
                });
            }
        }
    }

    fn report_failure(
        &self,
        url: &Url,
        address: &str,
        status: Option<StatusCode>,
        delivery: Delivery<L::Payload>,
    ) {
        match delivery {
            Delivery::Waiter(reply) => self.reply(url, reply, None),
            Delivery::Listener(payload) => {
                let listener = &self.shared.listener;
                guarded(&format!("Worker {}", self.shard), || {
                    listener.on_failure(url, address, status, payload);
                });
            }
        }
    }

    /// Hand the result of an internal task to its waiter. Results for
    /// waiters that gave up are dropped.
    fn reply(&self, url: &Url, reply: oneshot::Sender<Option<Bytes>>, body: Option<Bytes>) {
        if reply.send(body).is_err() {
            debug!("Worker {}: nobody is waiting for {url} anymore", self.shard);
        }
    }
}

impl<L: Listener> Drop for Worker<L> {
    fn drop(&mut self) {
        // Still registered only if processing panicked or the runtime shut down
        if self.registered {
            warn!("Worker {} stopped unexpectedly", self.fetcher.shard);
            let registry = &self.fetcher.shared.registry;
            let mut workers = registry.write();
            Registry::<L::Payload>::remove_locked(&mut workers, self.fetcher.shard, self.id);
            drop(workers);
            registry.notify_capacity();
        }
    }
}
