//! TLS integration core for a single-threaded, event-loop-driven
//! key-value server.
//!
//! Built as a library only: there is no binary target, since every
//! module here is meant to be linked into a host process that owns the
//! reactor, the command parser, and the rest of the server proper.

pub mod cert;
pub mod config;
pub mod engine;
pub mod error;
pub mod facade;
pub mod handshake;
pub mod io_shim;
pub mod rdb_handoff;
pub mod reactor;
pub mod registry;
pub mod repeated_reads;
pub mod rotate;
pub mod session;

/// Installs `env_logger` once for whichever test calls it, so a failing
/// test's `RUST_LOG` output is visible instead of silently dropped by
/// the default no-op logger.
#[cfg(test)]
pub(crate) fn init_test_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
