// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Logger initialization, built on `tracing` + `tracing-appender`: an
//! output sink, an env-filter level, and optional file rotation. `debug`
//! levels 0-5 from the tag attribute string map onto the same `tracing`
//! level filter used here.

use anyhow::{Context, Result};
use fastrace::collector::{Config as FastraceConfig, ConsoleReporter};
use tracing_appender::{non_blocking::WorkerGuard, rolling::{RollingFileAppender, Rotation}};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Where log output goes.
#[derive(Debug, Clone)]
pub enum LogSink {
    Stdout,
    Stderr,
    File { directory: String, file_name_prefix: String },
}

/// Maps a tag attribute `debug=0..5` level ("debug (0..5) [log verbosity]")
/// onto a `tracing` filter directive.
pub fn debug_level_to_filter(level: u8) -> &'static str {
    match level {
        0 => "off",
        1 => "error",
        2 => "warn",
        3 => "info",
        4 => "debug",
        _ => "trace",
    }
}

/// Initializes the global `tracing` subscriber. Returns a guard that must be
/// kept alive for the duration of the process (dropping it stops the
/// non-blocking writer from flushing).
pub fn init_logger(sink: LogSink, filter: &str) -> Result<WorkerGuard> {
    let (writer, guard) = match sink {
        LogSink::Stdout => tracing_appender::non_blocking(std::io::stdout()),
        LogSink::Stderr => tracing_appender::non_blocking(std::io::stderr()),
        LogSink::File { directory, file_name_prefix } => {
            let appender = RollingFileAppender::new(Rotation::DAILY, directory, file_name_prefix);
            tracing_appender::non_blocking(appender)
        },
    };

    let env_filter = EnvFilter::try_new(filter)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse log filter")?;

    fastrace::set_reporter(ConsoleReporter, FastraceConfig::default());
    let compat_layer = fastrace_tracing::FastraceCompatLayer::new();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(compat_layer)
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .try_init()
        .context("failed to install global tracing subscriber")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_level_maps_monotonically() {
        assert_eq!(debug_level_to_filter(0), "off");
        assert_eq!(debug_level_to_filter(5), "trace");
        assert_eq!(debug_level_to_filter(99), "trace");
    }
}
