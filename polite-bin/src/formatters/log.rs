use env_logger::{Builder, Env};
use log::{Level, LevelFilter};
use std::io::Write;

use crate::{formatters::color, verbosity::Verbosity};

/// Initialize the logging system with the given verbosity level.
pub(crate) fn init_logging(verbose: &Verbosity) {
    // Set a base level for all modules to `warn`.
    // It will be overridden by RUST_LOG if it's set.
    let env = Env::default().filter_or("RUST_LOG", "warn");

    let mut builder = Builder::from_env(env);
    builder
        .format_timestamp(None)
        .format_module_path(false)
        .format_target(false);

    if std::env::var("RUST_LOG").is_err() {
        // Other crates stay at `warn`; our own crates follow `-v`/`-q`.
        builder
            .filter_level(LevelFilter::Warn)
            .filter_module("polite", verbose.log_level_filter())
            .filter_module("polite_lib", verbose.log_level_filter());
    }

    builder.format(move |buf, record| {
        let level = record.level();
        let prefix = format!("[{level}]");
        writeln!(
            buf,
            "{} {}",
            style_for_level(level).apply_to(prefix),
            record.args()
        )
    });

    builder.init();
}

fn style_for_level(level: Level) -> console::Style {
    match level {
        Level::Error => color::bold_pink(),
        Level::Warn => color::bold_yellow(),
        Level::Info => color::normal(),
        Level::Debug => color::blue(),
        Level::Trace => color::dim(),
    }
}
