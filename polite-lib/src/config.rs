use http::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::ShardBy;

/// Default minimum delay between two fetches issued by the same worker
pub const DEFAULT_SITE_INTERVAL: Duration = Duration::from_secs(1);

/// Default maximum number of simultaneous workers
pub const DEFAULT_MAX_CONCURRENCY: usize = 60;

/// Default number of tasks buffered per worker
pub const DEFAULT_QUEUE_LENGTH: usize = 10;

/// Default timeout for establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for reading from an established connection
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Default period of the capacity monitor
pub const DEFAULT_MONITOR_INTERVAL: Duration = Duration::from_secs(1);

/// Default user agent, `polite/<PKG_VERSION>`.
pub const DEFAULT_USER_AGENT: &str = concat!("polite/", env!("CARGO_PKG_VERSION"));

/// User agent announcing a research crawler with a contact URL
pub const USER_AGENT_RESEARCH: &str =
    "Mozilla/5.0 (compatible; thunlp-research-exp/1.0; +http://nlp.csai.tsinghua.edu.cn)";

/// User agent of a desktop Firefox
pub const USER_AGENT_FIREFOX: &str = "Mozilla/5.0 (Windows; U; Windows NT 6.1; pl; rv:1.9.1) Gecko/20090624 Firefox/3.5 (.NET CLR 3.5.30729)";

/// User agent of Internet Explorer 7
pub const USER_AGENT_IE7: &str = "Mozilla/5.0 (Windows; U; MSIE 7.0; Windows NT 6.0; en-US)";

/// Scheduler configuration.
///
/// All values are fixed once the [`crate::Scheduler`] is built.
/// Durations are (de)serialized in humantime format, e.g. `"1s"` or `"250ms"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Minimum delay between two fetches issued by the same worker
    #[serde(default = "default_site_interval", with = "humantime_serde")]
    pub site_interval: Duration,

    /// Soft ceiling on the number of simultaneous workers
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Number of tasks a worker buffers before admission is rejected
    #[serde(default = "default_queue_length")]
    pub queue_length: usize,

    /// Timeout for establishing a connection
    #[serde(default = "default_connect_timeout", with = "humantime_serde")]
    pub connect_timeout: Duration,

    /// Timeout for reading from an established connection
    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    /// User agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Built-in shard-key strategy
    #[serde(default)]
    pub shard_by: ShardBy,

    /// Period of the capacity monitor
    #[serde(default = "default_monitor_interval", with = "humantime_serde")]
    pub monitor_interval: Duration,

    /// Additional headers sent with every request
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    #[serde(serialize_with = "serialize_headers")]
    pub headers: HeaderMap,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            site_interval: DEFAULT_SITE_INTERVAL,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            queue_length: DEFAULT_QUEUE_LENGTH,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            user_agent: default_user_agent(),
            shard_by: ShardBy::default(),
            monitor_interval: DEFAULT_MONITOR_INTERVAL,
            headers: HeaderMap::new(),
        }
    }
}

impl SchedulerConfig {
    /// Capacity of a worker queue.
    ///
    /// A queue always has room for at least the task that created its worker.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_length.max(1)
    }

    /// Add a header sent with every request
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is not a valid header value
    pub fn add_header(&mut self, name: HeaderName, value: &str) -> crate::Result<()> {
        self.headers.append(name, HeaderValue::from_str(value)?);
        Ok(())
    }
}

const fn default_site_interval() -> Duration {
    DEFAULT_SITE_INTERVAL
}

const fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

const fn default_queue_length() -> usize {
    DEFAULT_QUEUE_LENGTH
}

const fn default_connect_timeout() -> Duration {
    DEFAULT_CONNECT_TIMEOUT
}

const fn default_read_timeout() -> Duration {
    DEFAULT_READ_TIMEOUT
}

const fn default_monitor_interval() -> Duration {
    DEFAULT_MONITOR_INTERVAL
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

/// Custom deserializer for headers from TOML config format
fn deserialize_headers<'de, D>(deserializer: D) -> Result<HeaderMap, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    let mut header_map = HeaderMap::new();

    for (name, value) in map {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| serde::de::Error::custom(format!("Invalid header name '{name}': {e}")))?;
        let header_value = HeaderValue::from_str(&value).map_err(|e| {
            serde::de::Error::custom(format!("Invalid header value '{value}': {e}"))
        })?;
        header_map.insert(header_name, header_value);
    }

    Ok(header_map)
}

/// Custom serializer for headers to TOML config format
fn serialize_headers<S>(headers: &HeaderMap, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let map: HashMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or("").to_string()))
        .collect();
    map.serialize(serializer)
}
