//! The registry of live workers and the admission protocol.
//!
//! Admission and worker removal are serialized through a single
//! reader/writer lock:
//!
//! - enqueueing into an existing worker happens under the read lock,
//! - creating a worker, and a worker removing itself after finding its
//!   queue empty, happen under the write lock.
//!
//! A worker therefore never disappears between a task being enqueued and
//! being processed, and the worker ceiling is checked and updated atomically.
//! Guards are never held across an `.await`.

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, futures::Notified};

use super::WorkerHandle;
use crate::{ShardId, Task};

/// Why a task was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The queue of the worker serving the shard is full
    QueueFull,
    /// The shard has no worker and the worker ceiling is reached
    PoolSaturated,
    /// The worker serving the shard stopped unexpectedly
    WorkerGone,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "worker queue is full"),
            Self::PoolSaturated => write!(f, "worker pool is saturated"),
            Self::WorkerGone => write!(f, "worker has stopped"),
        }
    }
}

/// A task which was not admitted, handed back to the caller
#[derive(Debug)]
pub struct Rejected<P> {
    task: Task<P>,
    reason: RejectReason,
}

impl<P> Rejected<P> {
    pub(crate) const fn new(task: Task<P>, reason: RejectReason) -> Self {
        Self { task, reason }
    }

    /// Why the task was rejected
    #[must_use]
    pub const fn reason(&self) -> RejectReason {
        self.reason
    }

    /// The rejected task
    #[must_use]
    pub const fn task(&self) -> &Task<P> {
        &self.task
    }

    /// Take back ownership of the task, e.g. to retry later
    #[must_use]
    pub fn into_task(self) -> Task<P> {
        self.task
    }
}

pub(crate) type Workers<P> = HashMap<ShardId, WorkerHandle<P>>;

/// Live workers keyed by shard
#[derive(Debug)]
pub(crate) struct Registry<P> {
    workers: RwLock<Workers<P>>,
    /// Signalled whenever a queue slot or a worker slot frees up
    capacity: Notify,
    next_id: AtomicU64,
}

impl<P> Default for Registry<P> {
    fn default() -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            capacity: Notify::new(),
            next_id: AtomicU64::new(0),
        }
    }
}

impl<P> Registry<P> {
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Workers<P>> {
        self.workers.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Workers<P>> {
        self.workers.write()
    }

    /// Number of live workers
    pub(crate) fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub(crate) fn notify_capacity(&self) {
        self.capacity.notify_waiters();
    }

    /// A future completing on the next [`Self::notify_capacity`]
    pub(crate) fn capacity_notified(&self) -> Notified<'_> {
        self.capacity.notified()
    }

    /// Route `task` to the worker of its shard, creating that worker if the
    /// ceiling of `max_workers` allows it.
    ///
    /// `create` is called with a fresh worker id while the write lock is held
    /// and returns the handle to register along with the new worker, which
    /// takes ownership of the task. The new worker is handed back so that the
    /// caller starts it once the lock is released; `None` means the task went
    /// to an existing worker.
    pub(crate) fn admit<W, F>(
        &self,
        task: Task<P>,
        max_workers: usize,
        create: F,
    ) -> Result<Option<W>, Rejected<P>>
    where
        F: FnOnce(u64, Task<P>) -> (WorkerHandle<P>, W),
    {
        let shard = task.shard();
        let task = {
            let workers = self.read();
            match workers.get(&shard) {
                Some(worker) => return worker.submit(task).map(|()| None),
                None => task,
            }
        };

        let mut workers = self.write();
        // Another caller may have created the worker in between
        if let Some(worker) = workers.get(&shard) {
            return worker.submit(task).map(|()| None);
        }
        if workers.len() >= max_workers {
            return Err(Rejected::new(task, RejectReason::PoolSaturated));
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (handle, worker) = create(id, task);
        workers.insert(shard, handle);
        Ok(Some(worker))
    }

    /// Remove the worker of `shard` if it is still the one with `id`.
    ///
    /// Returns whether an entry was removed.
    pub(crate) fn remove_locked(workers: &mut Workers<P>, shard: ShardId, id: u64) -> bool {
        if workers.get(&shard).is_some_and(|worker| worker.id() == id) {
            workers.remove(&shard);
            return true;
        }
        false
    }
}
