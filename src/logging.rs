//! Structured logging setup, mirroring `init_logger` in the teacher's
//! `mock/control-api/src/lib.rs`: a terminal decorator feeding an async
//! drain, env-filtered, with the global `slog_scope`/`slog_stdlog` bridge
//! so vendored decode helpers using `log::` macros still route through it.

use slog::{o, Drain};
use slog_scope::GlobalLoggerGuard;

/// Initializes the process-wide [`slog`] logger.
///
/// # Panics
///
/// If [`slog_stdlog`] has already been initialized by something else in
/// the process.
#[must_use]
pub fn init_logger() -> GlobalLoggerGuard {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_envlogger::new(drain).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let logger = slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")));
    let scope_guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init().expect("slog_stdlog already initialized");

    scope_guard
}

/// Builds a plain root logger for tests and tools that don't need the
/// global scope/stdlog bridge.
#[must_use]
pub fn test_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, o!())
}
