use crate::verbosity::Verbosity;
use anyhow::{Context, Error, Result, anyhow};
use clap::{Parser, builder::TypedValueParser};
use const_format::{concatcp, formatcp};
use http::{
    HeaderMap,
    header::{HeaderName, HeaderValue},
};
use polite_lib::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_CONCURRENCY, DEFAULT_QUEUE_LENGTH, DEFAULT_READ_TIMEOUT,
    DEFAULT_SITE_INTERVAL, DEFAULT_USER_AGENT, SchedulerConfig, ShardBy,
};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::{str::FromStr, time::Duration};
use strum::{Display, EnumString};

pub(crate) const POLITE_CONFIG_FILE: &str = "polite.toml";

/// Ignore lines starting with this marker in input files
const COMMENT_MARKER: &str = "#";

// this exists because clap requires `&str` type values for defaults
// whereas serde expects owned `String` types
const MAX_CONCURRENCY_STR: &str = concatcp!(DEFAULT_MAX_CONCURRENCY);
const QUEUE_LENGTH_STR: &str = concatcp!(DEFAULT_QUEUE_LENGTH);
const SITE_INTERVAL_STR: &str = "1s";
const CONNECT_TIMEOUT_STR: &str = "30s";
const READ_TIMEOUT_STR: &str = "60s";
// We use a custom help message here because we want to show the default
// value of the config file, but also be able to check if the user has
// provided a custom value. If they didn't, we won't throw an error if
// the file doesn't exist.
const HELP_MSG_CONFIG_FILE: &str = formatcp!(
    "Configuration file to use\n\n[default: {}]",
    POLITE_CONFIG_FILE,
);

/// Format of the per-URL result lines
#[derive(
    Debug, Deserialize, Default, Clone, Display, EnumString, PartialEq, Eq,
)]
#[non_exhaustive]
pub(crate) enum OutputFormat {
    /// One human-readable line per URL
    #[serde(rename = "plain")]
    #[strum(serialize = "plain", ascii_case_insensitive)]
    #[default]
    Plain,

    /// One JSON object per URL
    #[serde(rename = "json")]
    #[strum(serialize = "json", ascii_case_insensitive)]
    Json,
}

// Macro for generating default functions to be used by serde
macro_rules! default_function {
    ( $( $name:ident : $T:ty = $e:expr; )* ) => {
        $(
            #[allow(clippy::missing_const_for_fn)]
            fn $name() -> $T {
                $e
            }
        )*
    };
}

// Generate the functions for serde defaults
default_function! {
    site_interval: Duration = DEFAULT_SITE_INTERVAL;
    max_concurrency: usize = DEFAULT_MAX_CONCURRENCY;
    queue_length: usize = DEFAULT_QUEUE_LENGTH;
    connect_timeout: Duration = DEFAULT_CONNECT_TIMEOUT;
    read_timeout: Duration = DEFAULT_READ_TIMEOUT;
    user_agent: String = DEFAULT_USER_AGENT.to_string();
    verbosity: Verbosity = Verbosity::default();
}

// Macro for merging configuration values
macro_rules! fold_in {
    ($cli:ident , $toml:ident ; $ty:ident { $(..$ignore:ident,)* $( $key:ident : $default:expr, )* } ) => {
        if (false) {
            #[allow(dead_code, unused, clippy::diverging_sub_expression)]
            let _check_fold_in_exhaustivity = $ty {
                $($key: unreachable!(), )*
                $($ignore: unreachable!(), )*
            };
        };
        $(
            if $cli.$key == $default && $toml.$key != $default {
                $cli.$key = $toml.$key;
            }
        )*
    };
}

/// Parse a single header into a [`HeaderName`] and [`HeaderValue`]
///
/// Headers are expected to be in format `Header-Name: Header-Value`.
/// The header name and value are trimmed of whitespace.
///
/// If the header contains multiple colons, the part after the first colon is
/// considered the value.
fn parse_single_header(header: &str) -> Result<(HeaderName, HeaderValue)> {
    let parts: Vec<&str> = header.splitn(2, ':').collect();
    match parts.as_slice() {
        [name, value] => {
            let name = name.trim();
            let name = HeaderName::from_str(name)
                .map_err(|e| anyhow!("Unable to convert header name '{name}': {e}"))?;
            let value = HeaderValue::from_str(value.trim())
                .map_err(|e| anyhow!("Unable to read value of header with name '{name}': {e}"))?;
            Ok((name, value))
        }
        _ => Err(anyhow!(
            "Invalid header format. Expected colon-separated string in the format 'HeaderName: HeaderValue'"
        )),
    }
}

/// Parses a single HTTP header into a tuple of (String, String)
#[derive(Clone, Debug)]
struct HeaderParser;

impl TypedValueParser for HeaderParser {
    type Value = (String, String);

    fn parse_ref(
        &self,
        _cmd: &clap::Command,
        _arg: Option<&clap::Arg>,
        value: &std::ffi::OsStr,
    ) -> Result<Self::Value, clap::Error> {
        let invalid = |message: String| {
            clap::Error::raw(clap::error::ErrorKind::InvalidValue, message)
        };
        let header_str = value
            .to_str()
            .ok_or_else(|| invalid("Header value contains invalid UTF-8".to_string()))?;

        let (name, value) = parse_single_header(header_str).map_err(|e| invalid(e.to_string()))?;
        let value = value
            .to_str()
            .map_err(|_| invalid("Header value contains invalid UTF-8".to_string()))?;
        Ok((name.to_string(), value.to_string()))
    }
}

impl clap::builder::ValueParserFactory for HeaderParser {
    type Parser = HeaderParser;
    fn value_parser() -> Self::Parser {
        HeaderParser
    }
}

/// Extension trait for converting a Vec of header pairs to a `HeaderMap`
pub(crate) trait HeaderMapExt {
    /// Convert a collection of header key-value pairs to a `HeaderMap`
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error>;
}

impl HeaderMapExt for HeaderMap {
    fn from_header_pairs(headers: &[(String, String)]) -> Result<HeaderMap, Error> {
        let mut header_map = HeaderMap::new();
        for (name, value) in headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| anyhow!("Invalid header name '{name}': {e}"))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|e| anyhow!("Invalid header value '{value}': {e}"))?;
            header_map.insert(header_name, header_value);
        }
        Ok(header_map)
    }
}

/// polite fetches web resources concurrently while keeping a minimum delay
/// between two requests to the same server.
///
/// URLs are grouped by the address their host resolves to; every group is
/// fetched sequentially by its own worker.
#[derive(Parser, Debug)]
#[command(version, about, next_display_order = None)]
pub(crate) struct PoliteOptions {
    /// URLs to fetch
    #[arg(
        name = "urls",
        required_unless_present = "input_file",
        required_unless_present = "fetch",
        long_help = "URLs to fetch. Alternatively, use `--input-file` to read them
from a file or from standard input."
    )]
    raw_urls: Vec<String>,

    /// Configuration file to use
    #[arg(short, long = "config")]
    #[arg(help = HELP_MSG_CONFIG_FILE)]
    pub(crate) config_file: Option<PathBuf>,

    /// Fetch a single URL and write its body to stdout
    #[arg(
        long,
        value_name = "URL",
        conflicts_with = "urls",
        conflicts_with = "input_file"
    )]
    pub(crate) fetch: Option<String>,

    #[clap(flatten)]
    pub(crate) config: Config,
}

impl PoliteOptions {
    /// All URLs to fetch: positional arguments first, then the input file.
    pub(crate) fn urls(&self) -> Result<Vec<String>> {
        let mut urls = self.raw_urls.clone();
        if let Some(path) = &self.config.input_file {
            let lines = if path == Path::new("-") {
                read_lines(io::stdin().lock())
            } else {
                let file = File::open(path)
                    .with_context(|| format!("Cannot open input file `{}`", path.display()))?;
                read_lines(BufReader::new(file))
            };
            urls.extend(lines.context("Cannot read URLs from --input-file")?);
        }
        Ok(urls)
    }
}

/// Read lines; ignore empty lines and comments
fn read_lines<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let lines: Vec<String> = reader.lines().collect::<Result<_, _>>()?;
    Ok(lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty() && !line.starts_with(COMMENT_MARKER))
        .collect())
}

// Custom deserializer function for the header field
fn deserialize_headers<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let map = HashMap::<String, String>::deserialize(deserializer)?;
    Ok(map.into_iter().collect())
}

/// The main configuration for polite
#[derive(Parser, Debug, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields)]
pub(crate) struct Config {
    /// Read URLs from the given file or stdin (if path is '-').
    #[arg(
        long,
        value_name = "PATH",
        long_help = "Read URLs from the given file or stdin (if path is '-').

One URL per line. Lines starting with '#' and empty lines are ignored."
    )]
    #[serde(default)]
    pub(crate) input_file: Option<PathBuf>,

    /// Verbose program output
    #[clap(flatten)]
    #[serde(default = "verbosity")]
    pub(crate) verbose: Verbosity,

    /// Minimum delay between two requests to the same server
    #[arg(long, value_parser = humantime::parse_duration, default_value = SITE_INTERVAL_STR)]
    #[serde(default = "site_interval", with = "humantime_serde")]
    pub(crate) site_interval: Duration,

    /// Maximum number of servers fetched from at the same time
    #[arg(long, default_value = MAX_CONCURRENCY_STR)]
    #[serde(default = "max_concurrency")]
    pub(crate) max_concurrency: usize,

    /// Number of URLs buffered per server
    #[arg(long, default_value = QUEUE_LENGTH_STR)]
    #[serde(default = "queue_length")]
    pub(crate) queue_length: usize,

    /// Timeout for establishing a connection
    #[arg(long, value_parser = humantime::parse_duration, default_value = CONNECT_TIMEOUT_STR)]
    #[serde(default = "connect_timeout", with = "humantime_serde")]
    pub(crate) connect_timeout: Duration,

    /// Timeout for reading from an established connection
    #[arg(long, value_parser = humantime::parse_duration, default_value = READ_TIMEOUT_STR)]
    #[serde(default = "read_timeout", with = "humantime_serde")]
    pub(crate) read_timeout: Duration,

    /// User agent
    #[arg(short, long, default_value = DEFAULT_USER_AGENT)]
    #[serde(default = "user_agent")]
    pub(crate) user_agent: String,

    /// Set custom header for requests
    #[arg(
        short = 'H',
        long = "header",
        value_parser = HeaderParser,
        number_of_values = 1,
        long_help = "Set custom header for requests

Some websites require custom headers to be passed in order to return valid responses.
You can specify custom headers in the format 'Name: Value'. For example, 'Accept: text/html'.
This is the same format that other tools like curl or wget use.
Multiple headers can be specified by using the flag multiple times."
    )]
    #[serde(default)]
    #[serde(deserialize_with = "deserialize_headers")]
    pub(crate) header: Vec<(String, String)>,

    /// Group URLs by resolved `address` or by `host` name
    #[arg(long, default_value_t = ShardBy::default())]
    #[serde(default)]
    pub(crate) shard_by: ShardBy,

    /// Log spare capacity of the worker pool while fetching
    #[arg(long)]
    #[serde(default)]
    pub(crate) monitor: bool,

    /// Output format of the per-URL result lines: `plain` or `json`
    #[arg(long, default_value_t = OutputFormat::default())]
    #[serde(default)]
    pub(crate) format: OutputFormat,

    /// Maximum time to wait for all fetches to finish
    #[arg(
        long,
        value_parser = humantime::parse_duration,
        long_help = "Maximum time to wait for all fetches to finish.

Without this option polite waits until every URL is processed. With `--fetch`
it defaults to 60s."
    )]
    #[serde(default, with = "humantime_serde")]
    pub(crate) wait_timeout: Option<Duration>,
}

impl Config {
    /// Special handling for merging headers
    ///
    /// Overwrites existing headers in `self` with the values from `other`.
    fn merge_headers(&mut self, other: &[(String, String)]) {
        let self_map = self.header.iter().cloned().collect::<HashMap<_, _>>();
        let other_map = other.iter().cloned().collect::<HashMap<_, _>>();

        // Merge the two maps, with `self` (the command line) taking precedence
        let merged_map: HashMap<_, _> = other_map.into_iter().chain(self_map).collect();
        self.header = merged_map.into_iter().collect();
    }

    /// Load configuration from a file
    pub(crate) fn load_from_file(path: &Path) -> Result<Config> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).with_context(|| "Failed to parse configuration file")
    }

    /// Merge the configuration from TOML into the CLI configuration
    pub(crate) fn merge(&mut self, toml: Config) {
        // Special handling for headers before fold_in!
        self.merge_headers(&toml.header);

        // NOTE: if you see an error within this macro call, check to make sure that
        // that the fields provided to fold_in! match all the fields of the Config struct.
        fold_in! {
            // Destination and source configs
            self, toml;

            Config {
                // Keys which are handled outside of fold_in
                ..header,

                // Keys with defaults to assign
                connect_timeout: DEFAULT_CONNECT_TIMEOUT,
                format: OutputFormat::default(),
                input_file: None,
                max_concurrency: DEFAULT_MAX_CONCURRENCY,
                monitor: false,
                queue_length: DEFAULT_QUEUE_LENGTH,
                read_timeout: DEFAULT_READ_TIMEOUT,
                shard_by: ShardBy::default(),
                site_interval: DEFAULT_SITE_INTERVAL,
                user_agent: DEFAULT_USER_AGENT,
                verbose: Verbosity::default(),
                wait_timeout: None,
            }
        }
    }

    /// Scheduler configuration from the merged options
    pub(crate) fn scheduler_config(&self) -> Result<SchedulerConfig> {
        Ok(SchedulerConfig {
            site_interval: self.site_interval,
            max_concurrency: self.max_concurrency,
            queue_length: self.queue_length,
            connect_timeout: self.connect_timeout,
            read_timeout: self.read_timeout,
            user_agent: self.user_agent.clone(),
            shard_by: self.shard_by,
            headers: HeaderMap::from_header_pairs(&self.header)?,
            ..SchedulerConfig::default()
        })
    }
}
