use bytes::Bytes;
use std::net::IpAddr;
use tokio::sync::oneshot;
use url::Url;

use crate::ShardId;

/// Addresses shorter than this are treated as unresolved, unless they are IP
/// literals such as `::1`.
pub(crate) const MIN_ADDRESS_LEN: usize = 5;

/// Where the outcome of a [`Task`] is delivered.
#[derive(Debug)]
pub(crate) enum Delivery<P> {
    /// Delivered to the external [`crate::Listener`] together with the payload
    Listener(P),
    /// Sent back to the one caller blocked in
    /// [`crate::Scheduler::schedule_and_wait`]; `None` for a failed fetch
    Waiter(oneshot::Sender<Option<Bytes>>),
}

/// An immutable fetch request routed to one shard.
///
/// Tasks are built by [`crate::Scheduler::build_task`] and owned by the queue
/// of the worker that processes them.
#[derive(Debug)]
pub struct Task<P> {
    url: Url,
    address: String,
    shard: ShardId,
    delivery: Delivery<P>,
}

impl<P> Task<P> {
    pub(crate) const fn new(url: Url, address: String, shard: ShardId, delivery: Delivery<P>) -> Self {
        Self {
            url,
            address,
            shard,
            delivery,
        }
    }

    /// The URL to fetch
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    /// The resolved network address of the URL host
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The shard (and therefore the worker) this task is routed to
    #[must_use]
    pub const fn shard(&self) -> ShardId {
        self.shard
    }

    /// The caller payload handed back to the listener, if this is an external task
    #[must_use]
    pub const fn payload(&self) -> Option<&P> {
        match &self.delivery {
            Delivery::Listener(payload) => Some(payload),
            Delivery::Waiter(_) => None,
        }
    }

    /// Whether the result is collected by the scheduler itself instead of
    /// being delivered to the listener
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self.delivery, Delivery::Waiter(_))
    }

    /// Whether the address is long enough to be a real network address
    #[must_use]
    pub fn has_usable_address(&self) -> bool {
        self.address.len() >= MIN_ADDRESS_LEN || self.address.parse::<IpAddr>().is_ok()
    }

    pub(crate) fn into_parts(self) -> (Url, String, Delivery<P>) {
        (self.url, self.address, self.delivery)
    }
}
