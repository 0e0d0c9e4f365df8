use bytes::Bytes;
use http::StatusCode;
use log::{info, warn};
use parking_lot::Mutex;
use polite_lib::{Listener, ShardId};
use std::io::{self, Write};
use url::Url;

use crate::formatters::{outcome::Outcome, stats::FetchStats};
use crate::options::OutputFormat;

/// Prints one line per fetched URL and keeps the totals of the run.
/// Capacity notifications of the monitor are logged.
#[derive(Debug)]
pub(crate) struct Reporter {
    format: OutputFormat,
    stats: Mutex<FetchStats>,
}

impl Reporter {
    pub(crate) fn new(format: OutputFormat) -> Self {
        Self {
            format,
            stats: Mutex::default(),
        }
    }

    /// Report a URL which was never scheduled
    pub(crate) fn unscheduled(&self, url: &str) {
        self.report(&Outcome::failure(url, "", None));
    }

    /// Totals of a run over `total` URLs
    pub(crate) fn stats(&self, total: usize) -> FetchStats {
        FetchStats {
            total,
            ..*self.stats.lock()
        }
    }

    fn report(&self, outcome: &Outcome) {
        if let Err(e) = write_line(&mut io::stdout().lock(), &outcome.format(&self.format)) {
            warn!("Cannot print result: {e}");
        }
        self.stats.lock().record(outcome);
    }
}

/// Write one result line. A closed stdout, e.g. `polite ... | head`, is not
/// an error.
fn write_line(out: &mut impl Write, line: &str) -> io::Result<()> {
    match writeln!(out, "{line}") {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        result => result,
    }
}

impl Listener for Reporter {
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
        self.report(&Outcome::success(url.as_str(), address, status, body.len()));
    }

    fn on_failure(&self, url: &Url, address: &str, status: Option<StatusCode>, (): ()) {
        self.report(&Outcome::failure(url.as_str(), address, status));
    }

    fn on_pool_capacity_available(&self, available: usize) {
        info!("Pool can take {available} more workers");
    }

    fn on_worker_queue_available(&self, shard: ShardId, available: usize) {
        info!("Worker {shard} can take {available} more URLs");
    }
}
