//! HTTP transport used by the workers.
//!
//! The scheduler only needs two things from the network: resolving a URL host
//! to an address (for sharding) and fetching a URL with `GET`. Both are
//! behind the [`Transport`] trait so the worker pool can be driven by a custom
//! client. [`ReqwestTransport`] is the default implementation.
#![allow(clippy::module_name_repetitions)]

use async_trait::async_trait;
use bytes::Bytes;
use http::{
    HeaderMap, StatusCode,
    header::{self, HeaderValue},
};
use std::time::{Duration, Instant};
use url::{Host, Url};

use crate::{ErrorKind, Result, SchedulerConfig};

/// A fetched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fetched {
    /// Status code of the response
    pub status: StatusCode,
    /// Response headers, normalized to `name:value` strings
    pub headers: Vec<String>,
    /// Raw response body
    pub body: Bytes,
    /// Time from sending the request until the response head arrived
    pub connect_time: Duration,
    /// Time spent reading the response body
    pub fetch_time: Duration,
}

/// The network operations the scheduler consumes.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` with `GET`.
    ///
    /// Any response that arrives in full counts as fetched, whatever its
    /// status code.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body cannot be read.
    /// [`ErrorKind::status`] carries the status code when one was received.
    async fn fetch(&self, url: &Url) -> Result<Fetched>;

    /// Resolve the host of `url` to a network address.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL has no host or the lookup fails.
    async fn resolve(&self, url: &Url) -> Result<String> {
        resolve_address(url).await
    }
}

/// Resolve the host of `url` with the system resolver.
///
/// IP literals are returned as they are, without a lookup.
///
/// # Errors
///
/// Returns an error if the URL has no host, the lookup fails, or it returns
/// no address.
pub async fn resolve_address(url: &Url) -> Result<String> {
    let host = match url.host() {
        Some(Host::Ipv4(ip)) => return Ok(ip.to_string()),
        Some(Host::Ipv6(ip)) => return Ok(ip.to_string()),
        Some(Host::Domain(domain)) => domain,
        None => return Err(ErrorKind::InvalidUrlHost),
    };
    let port = url.port_or_known_default().unwrap_or(80);

    let mut addresses = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| ErrorKind::UnresolvableHost {
            host: host.to_string(),
            source,
        })?;

    addresses
        .next()
        .map(|address| address.ip().to_string())
        .ok_or_else(|| ErrorKind::NoAddressFound(host.to_string()))
}

/// Turn a header map into `name:value` strings.
///
/// Values which are not valid UTF-8 are converted lossily.
#[must_use]
pub fn normalize_headers(headers: &HeaderMap) -> Vec<String> {
    headers
        .iter()
        .map(|(name, value)| format!("{}:{}", name, String::from_utf8_lossy(value.as_bytes())))
        .collect()
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
///
/// Connections are pooled by `reqwest` and returned to the pool once the
/// response is consumed or dropped.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport applying the timeouts, user agent and extra
    /// headers of `config`.
    ///
    /// # Errors
    ///
    /// Returns an `Err` if:
    /// - The user-agent is invalid.
    /// - The request client cannot be created.
    ///   See [here](https://docs.rs/reqwest/latest/reqwest/struct.ClientBuilder.html#errors).
    pub fn new(config: &SchedulerConfig) -> Result<Self> {
        let mut headers = config.headers.clone();
        headers.insert(
            header::USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(ErrorKind::InvalidHeader)?,
        );

        let client = reqwest::ClientBuilder::new()
            .gzip(true)
            .default_headers(headers)
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .build()
            .map_err(ErrorKind::BuildHttpClient)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, url: &Url) -> Result<Fetched> {
        let start = Instant::now();
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(ErrorKind::NetworkRequest)?;
        let connect_time = start.elapsed();

        let status = response.status();
        let headers = normalize_headers(response.headers());

        let start = Instant::now();
        let body = response
            .bytes()
            .await
            .map_err(|source| ErrorKind::ReadResponseBody { status, source })?;
        let fetch_time = start.elapsed();

        Ok(Fetched {
            status,
            headers,
            body,
            connect_time,
            fetch_time,
        })
    }
}
