use http::StatusCode;
use serde::Serialize;

use crate::formatters::color;
use crate::options::OutputFormat;

/// The result of one fetch as reported on stdout
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub(crate) struct Outcome {
    pub(crate) url: String,
    pub(crate) address: String,
    /// `None` when no response was received
    pub(crate) status: Option<u16>,
    /// Body length of a received response
    pub(crate) bytes: Option<usize>,
}

impl Outcome {
    pub(crate) fn success(url: &str, address: &str, status: StatusCode, bytes: usize) -> Self {
        Self {
            url: url.to_string(),
            address: address.to_string(),
            status: Some(status.as_u16()),
            bytes: Some(bytes),
        }
    }

    pub(crate) fn failure(url: &str, address: &str, status: Option<StatusCode>) -> Self {
        Self {
            url: url.to_string(),
            address: address.to_string(),
            status: status.map(|status| status.as_u16()),
            bytes: None,
        }
    }

    /// A response arrived and its status is 2xx
    pub(crate) fn is_success(&self) -> bool {
        self.bytes.is_some() && self.status.is_some_and(|status| (200..300).contains(&status))
    }

    pub(crate) fn format(&self, format: &OutputFormat) -> String {
        match format {
            OutputFormat::Plain => self.plain(),
            OutputFormat::Json => serde_json::to_string(self).unwrap_or_default(),
        }
    }

    fn plain(&self) -> String {
        let status = match self.status {
            Some(status) => format!("[{status}]"),
            None => "[ERR]".to_string(),
        };
        let status = if self.is_success() {
            color::green().apply_to(status)
        } else {
            color::pink().apply_to(status)
        };
        let mut line = format!("{status} {}", self.url);
        if !self.address.is_empty() {
            line.push_str(&format!(" ({})", self.address));
        }
        if let Some(bytes) = self.bytes {
            line.push_str(&format!(" {bytes} bytes"));
        }
        line
    }
}
