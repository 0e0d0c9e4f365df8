//! Shard-key computation.
//!
//! Every task is routed to a shard and every shard is served by exactly one
//! worker, so the shard key decides which requests share a politeness
//! interval. The default [`AddressShardKey`] groups requests by the resolved
//! network address, which enforces politeness per physical host even when a
//! host is reachable through several DNS aliases. [`HostShardKey`] groups by
//! host name instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Arc;
use strum::{Display, EnumString, VariantNames};
use url::Url;

/// Identifier of a shard, i.e. of the worker queue a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShardId(u64);

impl ShardId {
    /// Create a shard id from a raw value
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// The raw value of this shard id
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Hash any value into a shard id
    pub fn of<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl From<u64> for ShardId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Maps a request to the shard that serves it.
///
/// Implementations must be deterministic and must not perform I/O: the
/// strategy is invoked on the caller's side during task construction.
/// Closures of the form `Fn(&Url, &str) -> ShardId` implement this trait.
pub trait ShardKeyStrategy: Send + Sync {
    /// Compute the shard for `url`, whose host resolved to `address`
    fn shard(&self, url: &Url, address: &str) -> ShardId;
}

impl<F> ShardKeyStrategy for F
where
    F: Fn(&Url, &str) -> ShardId + Send + Sync,
{
    fn shard(&self, url: &Url, address: &str) -> ShardId {
        self(url, address)
    }
}

/// Shards by resolved network address (one worker per physical host).
#[derive(Debug, Clone, Copy, Default)]
pub struct AddressShardKey;

impl ShardKeyStrategy for AddressShardKey {
    fn shard(&self, _url: &Url, address: &str) -> ShardId {
        ShardId::of(address)
    }
}

/// Shards by host name, normalized to lowercase (one worker per domain).
///
/// URLs without a host fall back to their resolved address.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostShardKey;

impl ShardKeyStrategy for HostShardKey {
    fn shard(&self, url: &Url, address: &str) -> ShardId {
        match url.host_str() {
            Some(host) => ShardId::of(&host.to_lowercase()),
            None => ShardId::of(address),
        }
    }
}

/// The built-in shard-key strategies, selectable from configuration
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, VariantNames, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum ShardBy {
    /// One worker per resolved network address
    #[default]
    Address,
    /// One worker per host name
    Host,
}

impl ShardBy {
    /// The strategy implementing this choice
    #[must_use]
    pub fn strategy(self) -> Arc<dyn ShardKeyStrategy> {
        match self {
            Self::Address => Arc::new(AddressShardKey),
            Self::Host => Arc::new(HostShardKey),
        }
    }
}
