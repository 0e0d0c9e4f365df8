use bytes::Bytes;
use http::StatusCode;
use log::{error, info, warn};
use std::panic::{self, AssertUnwindSafe};
use url::Url;

use crate::ShardId;

/// Receives the outcome of every external fetch and the capacity
/// notifications of the [`crate::Monitor`].
///
/// Callbacks run on the worker that processed the task (or on the monitor
/// task), so they should return quickly. A panicking callback is caught and
/// logged; it never stops the worker.
pub trait Listener: Send + Sync + 'static {
    /// Opaque caller data passed through with each task
    type Payload: Send + 'static;

    /// A response arrived in full.
    ///
    /// `headers` holds the response headers as `name:value` strings.
    fn on_success(
        &self,
        url: &Url,
        address: &str,
        status: StatusCode,
        body: Bytes,
        headers: Vec<String>,
        payload: Self::Payload,
    );

    /// The fetch failed or was never attempted.
    ///
    /// `status` is `None` when no status code is known, e.g. on connection
    /// errors or when the address was unusable.
    fn on_failure(
        &self,
        url: &Url,
        address: &str,
        status: Option<StatusCode>,
        payload: Self::Payload,
    );

    /// The pool can take `available` more workers
    fn on_pool_capacity_available(&self, _available: usize) {}

    /// The worker serving `shard` can take `available` more tasks
    fn on_worker_queue_available(&self, _shard: ShardId, _available: usize) {}
}

/// A [`Listener`] which only logs outcomes.
///
/// Useful when results are consumed through
/// [`crate::Scheduler::schedule_and_wait`] only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogListener;

impl Listener for LogListener {
    type Payload = ();

    fn on_success(
        &self,
        url: &Url,
        address: &str,
        status: StatusCode,
        body: Bytes,
        _headers: Vec<String>,
        (): (),
    ) {
        info!("{url} ({address}) [{status}] {} bytes", body.len());
    }

    fn on_failure(&self, url: &Url, address: &str, status: Option<StatusCode>, (): ()) {
        match status {
            Some(status) => warn!("{url} ({address}) failed [{status}]"),
            None => warn!("{url} ({address}) failed"),
        }
    }
}

/// Run a listener callback, logging instead of propagating a panic
pub(crate) fn guarded<F: FnOnce()>(context: &str, callback: F) {
    if panic::catch_unwind(AssertUnwindSafe(callback)).is_err() {
        error!("{context}: listener callback panicked");
    }
}
