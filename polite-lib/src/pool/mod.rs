//! The worker pool.
//!
//! Each shard is served by at most one [`Worker`], created on demand when
//! the first task for the shard is admitted and removed as soon as its queue
//! runs empty. The [`Registry`] maps shards to live workers and implements
//! admission; the [`Monitor`] reports spare capacity back to the listener.

mod monitor;
mod registry;
mod stats;
mod worker;

pub use monitor::Monitor;
pub use registry::{RejectReason, Rejected};
pub use stats::WorkerStat;

pub(crate) use registry::Registry;
pub(crate) use worker::{Worker, WorkerHandle};
