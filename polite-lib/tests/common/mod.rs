#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use http::StatusCode;
use parking_lot::Mutex;
use polite_lib::{
    ErrorKind, Fetched, Listener, Result, Scheduler, SchedulerConfig, ShardId, Transport,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use url::Url;

/// One call to [`MockTransport::fetch`]
#[derive(Debug, Clone)]
pub struct Call {
    pub url: String,
    pub start: Instant,
    pub end: Instant,
}

/// Serves `body of <path>` for every URL after `delay`.
/// Paths starting with `/fail` produce a transport error, paths starting
/// with `/missing` a 404.
#[derive(Debug, Default)]
pub struct MockTransport {
    delay: Duration,
    hosts: HashMap<String, String>,
    calls: Mutex<Vec<Call>>,
}

impl MockTransport {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// Resolve `host` to `address`
    pub fn with_host(mut self, host: &str, address: &str) -> Self {
        self.hosts.insert(host.to_string(), address.to_string());
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(&self, url: &Url) -> Result<Fetched> {
        let start = Instant::now();
        tokio::time::sleep(self.delay).await;
        self.calls.lock().push(Call {
            url: url.to_string(),
            start,
            end: Instant::now(),
        });

        if url.path().starts_with("/fail") {
            return Err(ErrorKind::InvalidUrlHost);
        }
        let status = if url.path().starts_with("/missing") {
            StatusCode::NOT_FOUND
        } else {
            StatusCode::OK
        };
        Ok(Fetched {
            status,
            headers: vec!["content-type:text/plain".to_string()],
            body: Bytes::from(format!("body of {}", url.path())),
            connect_time: Duration::from_millis(1),
            fetch_time: self.delay,
        })
    }

    async fn resolve(&self, url: &Url) -> Result<String> {
        let host = url.host_str().ok_or(ErrorKind::InvalidUrlHost)?;
        self.hosts
            .get(host)
            .cloned()
            .ok_or_else(|| ErrorKind::NoAddressFound(host.to_string()))
    }
}

/// What a [`Recorder`] saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Success {
        url: String,
        status: StatusCode,
        body: Bytes,
        payload: u32,
    },
    Failure {
        url: String,
        status: Option<StatusCode>,
        payload: u32,
    },
}

/// Records every callback. Panics on success for URLs containing `panic`.
#[derive(Debug, Default)]
pub struct Recorder {
    events: Mutex<Vec<Event>>,
    pool_capacity: Mutex<Vec<usize>>,
    queue_capacity: Mutex<Vec<(ShardId, usize)>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn pool_capacity(&self) -> Vec<usize> {
        self.pool_capacity.lock().clone()
    }

    pub fn queue_capacity(&self) -> Vec<(ShardId, usize)> {
        self.queue_capacity.lock().clone()
    }
}

impl Listener for Recorder {
    type Payload = u32;

    fn on_success(
        &self,
        url: &Url,
        _address: &str,
        status: StatusCode,
        body: Bytes,
        _headers: Vec<String>,
        payload: u32,
    ) {
        self.events.lock().push(Event::Success {
            url: url.to_string(),
            status,
            body,
            payload,
        });
        assert!(!url.path().contains("panic"), "listener panic");
    }

    fn on_failure(&self, url: &Url, _address: &str, status: Option<StatusCode>, payload: u32) {
        self.events.lock().push(Event::Failure {
            url: url.to_string(),
            status,
            payload,
        });
    }

    fn on_pool_capacity_available(&self, available: usize) {
        self.pool_capacity.lock().push(available);
    }

    fn on_worker_queue_available(&self, shard: ShardId, available: usize) {
        self.queue_capacity.lock().push((shard, available));
    }
}

/// A scheduler over a [`MockTransport`] resolving `a.test` and `b.test` to
/// distinct addresses
pub fn scheduler(
    config: SchedulerConfig,
    delay: Duration,
) -> (Scheduler<Recorder>, Arc<MockTransport>) {
    let transport = Arc::new(
        MockTransport::new(delay)
            .with_host("a.test", "10.0.0.1")
            .with_host("b.test", "10.0.0.2")
            .with_host("c.test", "10.0.0.3")
            .with_host("alias.test", "10.0.0.1"),
    );
    let scheduler = polite_lib::SchedulerBuilder::builder()
        .listener(Recorder::default())
        .config(config)
        .transport(transport.clone())
        .build()
        .scheduler()
        .unwrap();
    (scheduler, transport)
}

pub fn config(site_interval: Duration, max_concurrency: usize, queue_length: usize) -> SchedulerConfig {
    SchedulerConfig {
        site_interval,
        max_concurrency,
        queue_length,
        ..SchedulerConfig::default()
    }
}
