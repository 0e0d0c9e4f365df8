//! `polite` is a library for fetching many web resources concurrently while
//! staying polite to every server involved.
//!
//! Requests are grouped into shards (by default one per resolved network
//! address). Each shard is served by a single worker which fetches its URLs
//! one at a time, waiting `site_interval` between two requests. Workers are
//! created on demand, bounded by `max_concurrency`, and disappear once their
//! queue is drained.
//!
//! ```no_run
//! use polite_lib::{LogListener, Result, Scheduler, SchedulerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let scheduler = Scheduler::new(SchedulerConfig::default(), LogListener)?;
//!   scheduler.schedule("https://example.com/", None, ()).await?;
//!   scheduler.schedule("https://example.com/about", None, ()).await?;
//!   scheduler.wait_for_all(None).await;
//!   Ok(())
//! }
//! ```
//!
//! To consume results in-band, use [`Scheduler::schedule_and_wait`]:
//!
//! ```no_run
//! use polite_lib::{DEFAULT_WAIT_TIMEOUT, LogListener, Result, Scheduler, SchedulerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!   let scheduler = Scheduler::new(SchedulerConfig::default(), LogListener)?;
//!   if let Some(body) = scheduler
//!       .schedule_and_wait("https://example.com/", None, DEFAULT_WAIT_TIMEOUT)
//!       .await
//!   {
//!       println!("{} bytes", body.len());
//!   }
//!   Ok(())
//! }
//! ```
#![warn(missing_docs)]

mod config;
mod listener;
mod scheduler;
mod shard;
mod transport;
mod types;

pub mod pool;

pub use crate::{
    config::{
        DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONCURRENCY, DEFAULT_MONITOR_INTERVAL,
        DEFAULT_QUEUE_LENGTH, DEFAULT_READ_TIMEOUT, DEFAULT_SITE_INTERVAL, DEFAULT_USER_AGENT,
        SchedulerConfig, USER_AGENT_FIREFOX, USER_AGENT_IE7, USER_AGENT_RESEARCH,
    },
    listener::{Listener, LogListener},
    pool::{Monitor, RejectReason, Rejected, WorkerStat},
    scheduler::{ADMISSION_RETRY_INTERVAL, DEFAULT_WAIT_TIMEOUT, Scheduler, SchedulerBuilder},
    shard::{AddressShardKey, HostShardKey, ShardBy, ShardId, ShardKeyStrategy},
    transport::{Fetched, ReqwestTransport, Transport, normalize_headers, resolve_address},
    types::{ErrorKind, Result, Task},
};
