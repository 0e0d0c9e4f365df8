//! `polite` fetches many web resources concurrently without hammering any
//! single server.
//!
//! The polite binary is a wrapper around polite-lib: URLs are grouped by
//! the address their host resolves to, and every group is fetched by its
//! own worker with a pause of `--site-interval` between two requests.
//!
//! Fetch a few pages:
//! ```sh
//! polite https://example.com/ https://example.com/about https://example.org/
//! ```
//!
//! Fetch a list of URLs, one per line:
//! ```sh
//! polite --input-file urls.txt --site-interval 2s --format json
//! cat urls.txt | polite --input-file -
//! ```
//!
//! Fetch one page and print its body:
//! ```sh
//! polite --fetch https://example.com/
//! ```
#![warn(clippy::all, clippy::pedantic)]
#![warn(
    absolute_paths_not_starting_with_crate,
    rustdoc::invalid_html_tags,
    missing_copy_implementations,
    missing_debug_implementations,
    semicolon_in_expressions_from_macros,
    unreachable_pub,
    unused_extern_crates,
    variant_size_differences,
    clippy::missing_const_for_fn
)]
#![deny(anonymous_parameters, macro_use_extern_crate)]
#![deny(missing_docs)]

use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Error, Result, bail};
use clap::{Parser, crate_version};
use formatters::log::init_logging;
use log::{error, info, warn};
use polite_lib::{DEFAULT_WAIT_TIMEOUT, Scheduler};

mod formatters;
mod options;
mod reporter;
mod verbosity;

use crate::options::{Config, POLITE_CONFIG_FILE, PoliteOptions};
use crate::reporter::Reporter;

/// A C-like enum that can be cast to `i32` and used as process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitCode {
    Success = 0,
    // NOTE: exit code 1 is used for any `Result::Err` bubbled up to `main()`
    // using the `?` operator.
    #[allow(unused)]
    UnexpectedFailure = 1,
    FetchFailure = 2,
    ConfigFile = 3,
}

fn main() -> Result<()> {
    // std::process::exit doesn't guarantee that all destructors will be run,
    // therefore we wrap the main code in another function to ensure that.
    let exit_code = run_main()?;
    std::process::exit(exit_code);
}

/// Merge all provided config options into one.
/// This includes a potential config file and command-line arguments
fn load_config() -> Result<PoliteOptions> {
    let mut opts = PoliteOptions::parse();

    init_logging(&opts.config.verbose);

    // Load a potentially existing config file and merge it into the config from
    // the CLI
    if let Some(config_file) = &opts.config_file {
        match Config::load_from_file(config_file) {
            Ok(c) => opts.config.merge(c),
            Err(e) => {
                bail!(
                    "Cannot load configuration file `{}`: {e:?}",
                    config_file.display()
                );
            }
        }
    } else {
        // Without an explicit config file, load the default one from the
        // current directory if it exists. An invalid default file is an error
        // just like an invalid explicit one.
        let default_config = PathBuf::from(POLITE_CONFIG_FILE);
        if default_config.is_file() {
            match Config::load_from_file(&default_config) {
                Ok(c) => opts.config.merge(c),
                Err(e) => {
                    bail!(
                        "Cannot load default configuration file `{}`: {e:?}",
                        default_config.display()
                    );
                }
            }
        }
    }

    Ok(opts)
}

/// Set up runtime and call polite entrypoint
fn run_main() -> Result<i32> {
    use std::process::exit;

    let opts = match load_config() {
        Ok(opts) => opts,
        Err(e) => {
            error!("Error while loading config: {e}");
            exit(ExitCode::ConfigFile as i32);
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;

    match runtime.block_on(run(&opts)) {
        Err(e) if Some(io::ErrorKind::BrokenPipe) == underlying_io_error_kind(&e) => {
            exit(ExitCode::Success as i32);
        }
        res => res,
    }
}

/// Check if the given error can be traced back to an `io::ErrorKind`
/// This is helpful for troubleshooting the root cause of an error.
/// Code is taken from the anyhow documentation.
fn underlying_io_error_kind(error: &Error) -> Option<io::ErrorKind> {
    for cause in error.chain() {
        if let Some(io_error) = cause.downcast_ref::<io::Error>() {
            return Some(io_error.kind());
        }
    }
    None
}

/// Run polite on the given inputs
async fn run(opts: &PoliteOptions) -> Result<i32> {
    let scheduler = match opts
        .config
        .scheduler_config()
        .and_then(|config| {
            Scheduler::new(config, Reporter::new(opts.config.format.clone()))
                .context("Cannot create scheduler")
        }) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Invalid configuration: {e:#}");
            return Ok(ExitCode::ConfigFile as i32);
        }
    };

    if let Some(url) = &opts.fetch {
        return fetch(&scheduler, url, opts.config.wait_timeout).await;
    }

    let urls = opts.urls()?;
    info!(
        "Fetching {} URLs (polite {})",
        urls.len(),
        crate_version!()
    );

    let monitor = opts.config.monitor.then(|| scheduler.spawn_monitor());

    for url in &urls {
        // polite-lib logs why a URL cannot be scheduled
        if scheduler.schedule(url, None, ()).await.is_err() {
            scheduler.listener().unscheduled(url);
        }
    }

    let drained = scheduler.wait_for_all(opts.config.wait_timeout).await;
    if let Some(monitor) = monitor {
        monitor.stop().await;
    }
    if !drained {
        warn!(
            "Gave up waiting for {} workers after {}",
            scheduler.current_concurrency(),
            humantime::format_duration(opts.config.wait_timeout.unwrap_or_default())
        );
    }

    let stats = scheduler.listener().stats(urls.len());
    eprintln!("{stats}");

    let exit_code = if stats.is_success() {
        ExitCode::Success
    } else {
        ExitCode::FetchFailure
    };
    Ok(exit_code as i32)
}

/// Fetch a single URL through the scheduler and write its body to stdout
async fn fetch(
    scheduler: &Scheduler<Reporter>,
    url: &str,
    timeout: Option<Duration>,
) -> Result<i32> {
    let timeout = timeout.unwrap_or(DEFAULT_WAIT_TIMEOUT);
    let Some(body) = scheduler.schedule_and_wait(url, None, timeout).await else {
        error!("Cannot fetch {url}");
        return Ok(ExitCode::FetchFailure as i32);
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(&body)?;
    stdout.flush()?;
    Ok(ExitCode::Success as i32)
}
