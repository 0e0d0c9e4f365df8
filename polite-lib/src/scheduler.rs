use bytes::Bytes;
use log::{debug, warn};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use typed_builder::TypedBuilder;
use url::Url;

use crate::pool::{Monitor, Registry, Rejected, Worker, WorkerStat};
use crate::types::Delivery;
use crate::{
    ErrorKind, Listener, ReqwestTransport, Result, SchedulerConfig, ShardKeyStrategy, Task,
    Transport,
};

/// Upper bound on how long a blocked admission sleeps before retrying,
/// in case a capacity notification was missed
pub const ADMISSION_RETRY_INTERVAL: Duration = Duration::from_millis(100);

/// Default timeout of [`Scheduler::schedule_and_wait`]
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(60);

/// State shared between the scheduler, its workers and the monitor
pub(crate) struct Shared<L: Listener> {
    pub(crate) config: SchedulerConfig,
    pub(crate) registry: Registry<L::Payload>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) strategy: Arc<dyn ShardKeyStrategy>,
    pub(crate) listener: Arc<L>,
}

/// Builder for [`Scheduler`].
///
/// Only the listener is required. Without an explicit transport a
/// [`ReqwestTransport`] is built from the configuration, and without an
/// explicit shard strategy the one selected by
/// [`SchedulerConfig::shard_by`] is used.
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
Create a builder for building `SchedulerBuilder`.

On the builder call, call methods with same name as its fields to set their values.

Finally, call `.build()` to create the instance of `SchedulerBuilder`.
"))]
pub struct SchedulerBuilder<L: Listener> {
    /// Receives the outcome of every external task
    listener: L,

    /// Pool configuration, fixed for the lifetime of the scheduler
    #[builder(default)]
    config: SchedulerConfig,

    /// Custom network layer, e.g. a mock in tests
    #[builder(default, setter(strip_option))]
    transport: Option<Arc<dyn Transport>>,

    /// Custom shard-key strategy
    #[builder(default, setter(strip_option))]
    shard_strategy: Option<Arc<dyn ShardKeyStrategy>>,
}

impl<L: Listener> SchedulerBuilder<L> {
    /// Instantiates a [`Scheduler`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if no transport was given and the default
    /// [`ReqwestTransport`] cannot be built from the configuration.
    pub fn scheduler(self) -> Result<Scheduler<L>> {
        let Self {
            listener,
            config,
            transport,
            shard_strategy,
        } = self;

        let transport = match transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&config)?),
        };
        let strategy = shard_strategy.unwrap_or_else(|| config.shard_by.strategy());

        Ok(Scheduler {
            shared: Arc::new(Shared {
                config,
                registry: Registry::default(),
                transport,
                strategy,
                listener: Arc::new(listener),
            }),
        })
    }
}

/// Schedules fetch tasks onto per-shard workers.
///
/// Tasks for the same shard are processed one after another by a single
/// worker, in admission order, with at least `site_interval` between the end
/// of one fetch and the start of the next. Tasks for different shards run
/// concurrently on up to `max_concurrency` workers.
///
/// The scheduler is cheap to clone; clones share the same pool.
pub struct Scheduler<L: Listener> {
    shared: Arc<Shared<L>>,
}

impl<L: Listener> Clone for Scheduler<L> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<L: Listener> fmt::Debug for Scheduler<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.shared.config)
            .field("workers", &self.current_concurrency())
            .finish_non_exhaustive()
    }
}

impl<L: Listener> Scheduler<L> {
    /// Create a scheduler with the default transport and shard strategy.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the HTTP client cannot be built from `config`.
    pub fn new(config: SchedulerConfig, listener: L) -> Result<Self> {
        SchedulerBuilder::builder()
            .listener(listener)
            .config(config)
            .build()
            .scheduler()
    }

    /// The configuration of this scheduler
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    /// The listener receiving task outcomes
    #[must_use]
    pub fn listener(&self) -> &L {
        &self.shared.listener
    }

    /// Parse `url`, resolve its address unless given, and compute its shard.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the URL is malformed or its host cannot be resolved.
    pub async fn build_task(
        &self,
        url: &str,
        address: Option<&str>,
        payload: L::Payload,
    ) -> Result<Task<L::Payload>> {
        self.task(url, address, Delivery::Listener(payload))
            .await
            .inspect_err(|e| warn!("Cannot schedule {url}: {e}"))
    }

    async fn task(
        &self,
        url: &str,
        address: Option<&str>,
        delivery: Delivery<L::Payload>,
    ) -> Result<Task<L::Payload>> {
        let url = Url::parse(url).map_err(|e| ErrorKind::ParseUrl(url.to_string(), e))?;
        let address = match address {
            Some(address) => address.to_string(),
            None => self.shared.transport.resolve(&url).await?,
        };
        let shard = self.shared.strategy.shard(&url, &address);
        Ok(Task::new(url, address, shard, delivery))
    }

    /// Try to admit `task` without waiting.
    ///
    /// The task goes to the worker of its shard if that worker exists and
    /// its queue has room. Otherwise a new worker is created unless
    /// `max_concurrency` workers are already alive.
    ///
    /// # Errors
    ///
    /// Hands the task back if it could not be admitted.
    pub fn try_admit(&self, task: Task<L::Payload>) -> std::result::Result<(), Rejected<L::Payload>> {
        let shared = &self.shared;
        let shard = task.shard();
        let url = task.url().clone();

        let admitted = shared
            .registry
            .admit(task, shared.config.max_concurrency, |id, task| {
                Worker::new(shared, id, task)
            })
            .inspect_err(|rejected| debug!("Not scheduling {url}: {}", rejected.reason()))?;

        debug!("Scheduled {url} to worker {shard}");
        if let Some(worker) = admitted {
            worker.start();
        }
        Ok(())
    }

    /// Admit `task`, waiting for capacity for as long as it takes
    async fn admit(&self, mut task: Task<L::Payload>) {
        loop {
            let notified = self.shared.registry.capacity_notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_admit(task) {
                Ok(()) => return,
                Err(rejected) => task = rejected.into_task(),
            }
            let _ = tokio::time::timeout(ADMISSION_RETRY_INTERVAL, notified).await;
        }
    }

    /// Admit `task`, waiting for capacity until `deadline`
    async fn admit_before(
        &self,
        mut task: Task<L::Payload>,
        deadline: Instant,
    ) -> std::result::Result<(), Rejected<L::Payload>> {
        loop {
            let notified = self.shared.registry.capacity_notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_admit(task) {
                Ok(()) => return Ok(()),
                Err(rejected) if Instant::now() >= deadline => return Err(rejected),
                Err(rejected) => task = rejected.into_task(),
            }
            let wake = deadline.min(Instant::now() + ADMISSION_RETRY_INTERVAL);
            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }

    /// Schedule a fetch whose outcome is delivered to the listener along
    /// with `payload`.
    ///
    /// Waits until the task is admitted. If `address` is `None` the host of
    /// `url` is resolved first.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the URL is malformed or its host cannot be
    /// resolved; nothing is scheduled in that case.
    pub async fn schedule(
        &self,
        url: &str,
        address: Option<&str>,
        payload: L::Payload,
    ) -> Result<()> {
        let task = self.build_task(url, address, payload).await?;
        self.admit(task).await;
        Ok(())
    }

    /// Schedule a fetch only if it can be admitted right away.
    ///
    /// Returns `Ok(false)` if the worker queue of the shard is full, or if
    /// the shard has no worker and the pool is saturated.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the URL is malformed or its host cannot be
    /// resolved.
    pub async fn schedule_non_blocking(
        &self,
        url: &str,
        address: Option<&str>,
        payload: L::Payload,
    ) -> Result<bool> {
        let task = self.build_task(url, address, payload).await?;
        Ok(self.try_admit(task).is_ok())
    }

    /// Fetch `url` through the pool and wait for its body.
    ///
    /// The fetch is subject to the same politeness as every other task of
    /// its shard, and the listener is not involved. `timeout` bounds the
    /// whole call, admission included.
    ///
    /// Returns `None` if the task could not be built or admitted in time,
    /// if the fetch failed, or if no result arrived before the timeout.
    pub async fn schedule_and_wait(
        &self,
        url: &str,
        address: Option<&str>,
        timeout: Duration,
    ) -> Option<Bytes> {
        let deadline = Instant::now() + timeout;

        let (reply, result) = oneshot::channel();
        let task = match self.task(url, address, Delivery::Waiter(reply)).await {
            Ok(task) => task,
            Err(e) => {
                warn!("Cannot fetch {url}: {e}");
                return None;
            }
        };
        let url = task.url().clone();

        if let Err(rejected) = self.admit_before(task, deadline).await {
            debug!("Gave up fetching {url}: {}", rejected.reason());
            return None;
        }
        match tokio::time::timeout_at(deadline, result).await {
            Ok(Ok(body)) => body,
            // The worker stopped without processing the task
            Ok(Err(_)) => None,
            Err(_) => {
                debug!("Timed out waiting for {url}");
                None
            }
        }
    }

    /// A snapshot of every live worker, ordered by shard
    #[must_use]
    pub fn worker_stats(&self) -> Vec<WorkerStat> {
        let mut stats: Vec<WorkerStat> = self
            .shared
            .registry
            .read()
            .iter()
            .map(|(shard, worker)| worker.stat(*shard))
            .collect();
        stats.sort_by_key(|stat| stat.shard);
        stats
    }

    /// Number of live workers
    #[must_use]
    pub fn current_concurrency(&self) -> usize {
        self.shared.registry.len()
    }

    /// Start reporting spare capacity to the listener every
    /// `monitor_interval`.
    #[must_use]
    pub fn spawn_monitor(&self) -> Monitor {
        Monitor::spawn(Arc::clone(&self.shared))
    }

    /// Wait until every worker has drained its queue and terminated.
    ///
    /// Returns `false` if workers were still alive when `timeout` elapsed.
    pub async fn wait_for_all(&self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            let notified = self.shared.registry.capacity_notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.current_concurrency() == 0 {
                return true;
            }
            let now = Instant::now();
            if deadline.is_some_and(|deadline| now >= deadline) {
                return false;
            }
            let wake = match deadline {
                Some(deadline) => deadline.min(now + ADMISSION_RETRY_INTERVAL),
                None => now + ADMISSION_RETRY_INTERVAL,
            };
            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }
}
