use serde::Serialize;
use std::fmt;

use crate::formatters::outcome::Outcome;

/// Totals of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct FetchStats {
    /// URLs read from the inputs
    pub(crate) total: usize,
    /// Fetches that returned a 2xx response
    pub(crate) successful: usize,
    /// Responses with another status code
    pub(crate) errors: usize,
    /// Fetches without a response, including URLs that could not be scheduled
    pub(crate) failed: usize,
}

impl FetchStats {
    pub(crate) fn record(&mut self, outcome: &Outcome) {
        if outcome.is_success() {
            self.successful += 1;
        } else if outcome.bytes.is_some() {
            self.errors += 1;
        } else {
            self.failed += 1;
        }
    }

    /// URLs still without an outcome
    pub(crate) const fn pending(&self) -> usize {
        self.total
            .saturating_sub(self.successful + self.errors + self.failed)
    }

    pub(crate) const fn is_success(&self) -> bool {
        self.errors == 0 && self.failed == 0 && self.pending() == 0
    }
}

impl fmt::Display for FetchStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total, {} successful, {} errors, {} failed",
            self.total, self.successful, self.errors, self.failed
        )?;
        if self.pending() > 0 {
            write!(f, ", {} pending", self.pending())?;
        }
        Ok(())
    }
}
