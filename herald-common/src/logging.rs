use std::{io::IsTerminal, str::FromStr};

use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

#[macro_export]
macro_rules! log {
    ($level:expr, $span:expr, $($msg:expr),*) => {{
        let span = $crate::tracing::span!($level, $span);
        let _enter = span.enter();

        $crate::tracing::event!($level, $($msg),*)
    }};
}

/// Events from the dispatch path (ticks, sends, finalization)
#[macro_export]
macro_rules! dispatch {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "dispatch", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::dispatch!(level = TRACE, $($msg),*)
    };
}

#[macro_export]
macro_rules! internal {
    (level = $level:ident, $($msg:expr),*) => {
        $crate::log!($crate::tracing::Level::$level, "internal", $($msg),*)
    };

    ($($msg:expr),*) => {
        $crate::internal!(level = TRACE, $($msg),*)
    };
}

/// Environment variable holding the log level
pub const LEVEL_ENV: &str = "LOG_LEVEL";

fn level_from(value: Option<&str>) -> LevelFilter {
    let default = if cfg!(debug_assertions) {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };

    value.map_or(default, |value| {
        LevelFilter::from_str(value).unwrap_or_else(|_| {
            eprintln!("Ignoring {LEVEL_ENV}={value}, logging at {default}");
            default
        })
    })
}

/// Install the global subscriber, writing to stderr so command output on
/// stdout stays clean.
///
/// The level comes from `LOG_LEVEL`, falling back to `DEBUG` in debug builds
/// and `INFO` otherwise. Only herald's own targets are emitted. Calling this
/// again is harmless.
pub fn init() {
    let level = level_from(std::env::var(LEVEL_ENV).ok().as_deref());

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .compact()
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339())
        .with_filter(level)
        .with_filter(FilterFn::new(|metadata| {
            metadata.target().starts_with("herald")
        }));

    if tracing_subscriber::registry().with(layer).try_init().is_err() {
        internal!("Global subscriber already installed");
    }
}
