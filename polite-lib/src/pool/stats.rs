use serde::Serialize;
use std::time::Duration;

use crate::ShardId;

/// A snapshot of the state of one worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStat {
    /// The shard served by the worker
    pub shard: ShardId,
    /// Number of tasks waiting in the worker queue
    pub queued: usize,
    /// Time since the worker was created
    #[serde(with = "humantime_serde")]
    pub lifetime: Duration,
    /// Number of successful fetches
    pub fetched: u64,
    /// Mean time until the response head arrived
    #[serde(with = "humantime_serde")]
    pub mean_connect_time: Duration,
    /// Mean time spent reading response bodies
    #[serde(with = "humantime_serde")]
    pub mean_fetch_time: Duration,
}

/// Running totals of a worker, updated after each successful fetch
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WorkerCounters {
    fetched: u64,
    connect_time: Duration,
    fetch_time: Duration,
}

impl WorkerCounters {
    pub(crate) fn record(&mut self, connect_time: Duration, fetch_time: Duration) {
        self.fetched += 1;
        self.connect_time += connect_time;
        self.fetch_time += fetch_time;
    }

    pub(crate) const fn fetched(&self) -> u64 {
        self.fetched
    }

    pub(crate) fn snapshot(&self, shard: ShardId, queued: usize, lifetime: Duration) -> WorkerStat {
        WorkerStat {
            shard,
            queued,
            lifetime,
            fetched: self.fetched,
            mean_connect_time: mean(self.connect_time, self.fetched),
            mean_fetch_time: mean(self.fetch_time, self.fetched),
        }
    }
}

fn mean(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    total / u32::try_from(count).unwrap_or(u32::MAX)
}
