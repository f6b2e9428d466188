//! Facade — the fd-keyed entry points exposed to the host process that
//! embeds this core: accept a new client, rotate the live certificate,
//! tear down a connection, resize the registry, and drive the two
//! RDB-handoff renegotiation sides. Each wraps a primitive defined
//! elsewhere (`registry.rs`/`rotate.rs`/`session.rs`/`rdb_handoff.rs`);
//! this module exists so every one of those operations has a single,
//! concrete, fd-keyed symbol to call rather than requiring the host to
//! reassemble registry-detach/reconstruct/registry-attach sequences
//! itself at each call site.
//!
//! No direct analogue elsewhere in this tree (an HTTP client library
//! never exposes a downstream fd-keyed contract like this); new code.

use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::time::Instant;

use crate::config::{ClientConfig, PerformanceMode, ServerConfig};
use crate::error::{ConfigError, CoreError};
use crate::rdb_handoff;
use crate::registry::SessionRegistry;
use crate::rotate::{CertRotator, RotationState};
use crate::session::{Session, SessionFlags};

/// Constructs a client-role session for a connection this process
/// initiated (cluster link, replication link) and attaches it to
/// `registry` under `fd`.
pub fn setup_ssl_on_client(
    registry: &mut SessionRegistry,
    fd: RawFd,
    config: &ClientConfig,
    performance_mode: PerformanceMode,
    peer_name_for_sni: Option<&str>,
) -> Result<(), CoreError> {
    let session = Session::new_client(
        fd,
        config,
        performance_mode,
        peer_name_for_sni,
        SessionFlags::CLIENT_ORIGIN,
    )?;
    registry.attach(fd, session)?;
    Ok(())
}

/// Rotates the live certificate. Thin pass-through to
/// [`CertRotator::renew`] — this is the named entry point the host calls;
/// `CertRotator` itself stays the place the rotation algorithm lives.
pub fn renew_certificate(
    state: &mut RotationState,
    new_cert_pem: &[u8],
    new_key_pem: &[u8],
    cipher_prefs: &str,
    performance_mode: PerformanceMode,
    certificate_file: Option<PathBuf>,
    private_key_file: Option<PathBuf>,
    live_client_sessions: &mut [(&mut Session, Instant)],
    force_close: impl FnMut(&mut Session),
) -> Result<(), ConfigError> {
    CertRotator::renew(
        state,
        new_cert_pem,
        new_key_pem,
        cipher_prefs,
        performance_mode,
        certificate_file,
        private_key_file,
        live_client_sessions,
        force_close,
    )
}

/// Detaches and tears down `fd`'s session, sending a best-effort
/// `close_notify` first. A no-op if `fd` has no live session.
pub fn cleanup_ssl_for_fd(registry: &mut SessionRegistry, fd: RawFd) {
    if let Some(session) = registry.detach(fd) {
        session.teardown(true);
    }
}

/// Detaches and tears down `fd`'s session without sending a
/// `close_notify` — needed wherever the write side is already poisoned
/// (RDB handoff, a forked child's raw writes) and a shutdown alert would
/// just inject garbage into the stream the peer is about to renegotiate
/// on top of.
pub fn cleanup_ssl_for_fd_without_shutdown(registry: &mut SessionRegistry, fd: RawFd) {
    if let Some(session) = registry.detach(fd) {
        session.teardown(false);
    }
}

/// Resizes the fd-keyed registry. See [`SessionRegistry::resize`] for the
/// "no live fd at or beyond new_size" precondition.
pub fn resize_registry(registry: &mut SessionRegistry, new_size: usize) -> Result<(), CoreError> {
    registry.resize(new_size)
}

/// Master-process side of the RDB handoff: tears down `fd`'s poisoned
/// session and attaches a fresh server-role one for the renegotiation.
pub fn start_handshake_with_slave_after_rdb(
    registry: &mut SessionRegistry,
    fd: RawFd,
    config: &ServerConfig,
    performance_mode: PerformanceMode,
) -> Result<(), CoreError> {
    let old_session = registry
        .detach(fd)
        .ok_or_else(|| CoreError::invariant(format!("no session for fd {fd} to renegotiate")))?;
    let session =
        rdb_handoff::begin_master_side_renegotiation(old_session, fd, config, performance_mode)?;
    registry.attach(fd, session)?;
    Ok(())
}

/// Replica-process side of the RDB handoff: tears down `fd`'s poisoned
/// session and attaches a fresh client-role one for renegotiating with
/// the master.
pub fn start_handshake_with_master_after_rdb_load(
    registry: &mut SessionRegistry,
    fd: RawFd,
    config: &ClientConfig,
    performance_mode: PerformanceMode,
    master_hostname: Option<&str>,
) -> Result<(), CoreError> {
    let old_session = registry
        .detach(fd)
        .ok_or_else(|| CoreError::invariant(format!("no session for fd {fd} to renegotiate")))?;
    let session = rdb_handoff::begin_replica_side_renegotiation(
        old_session,
        fd,
        config,
        performance_mode,
        master_hostname,
    )?;
    registry.attach(fd, session)?;
    Ok(())
}

/// `true` once the slave at `fd` has accepted the RDB load-notification
/// byte on the transport. `false` if `fd` has no live session.
pub fn wait_for_slave_to_finish_rdb(registry: &SessionRegistry, fd: RawFd) -> bool {
    registry
        .get(fd)
        .map(rdb_handoff::load_notification_sent)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::session::Role;
    use std::sync::{Arc, RwLock};

    const TEST_CERT: &str = include_str!("../testdata/test_cert.pem");
    const TEST_KEY: &str = include_str!("../testdata/test_key.pem");

    fn client_config() -> ClientConfig {
        let expected_hostname = Arc::new(RwLock::new(Some("redis-7.example.com".to_string())));
        ConfigBuilder::build_client("", TEST_CERT.as_bytes(), None, expected_hostname).unwrap()
    }

    #[test]
    fn setup_ssl_on_client_attaches_a_session() {
        crate::init_test_logging();
        let config = client_config();
        let mut registry = SessionRegistry::new(64);
        setup_ssl_on_client(
            &mut registry,
            10,
            &config,
            PerformanceMode::HighThroughput,
            Some("redis-7.example.com"),
        )
        .unwrap();
        assert!(registry.get(10).is_some());
    }

    #[test]
    fn cleanup_ssl_for_fd_without_shutdown_detaches_the_session() {
        let config = client_config();
        let mut registry = SessionRegistry::new(64);
        setup_ssl_on_client(&mut registry, 10, &config, PerformanceMode::HighThroughput, None).unwrap();
        cleanup_ssl_for_fd_without_shutdown(&mut registry, 10);
        assert!(registry.get(10).is_none());
    }

    #[test]
    fn cleanup_ssl_for_fd_on_unknown_fd_is_a_no_op() {
        let mut registry = SessionRegistry::new(8);
        cleanup_ssl_for_fd(&mut registry, 3);
        assert!(registry.get(3).is_none());
    }

    #[test]
    fn resize_registry_wraps_the_registry_precondition() {
        let mut registry = SessionRegistry::new(8);
        assert!(resize_registry(&mut registry, 4).is_ok());
        assert_eq!(registry.len(), 4);
        registry
            .attach(5, Session::new_for_test(5, Role::Client))
            .unwrap_err();
    }

    #[test]
    fn wait_for_slave_to_finish_rdb_reflects_the_flag() {
        let mut registry = SessionRegistry::new(8);
        registry.attach(3, Session::new_for_test(3, Role::Client)).unwrap();
        assert!(!wait_for_slave_to_finish_rdb(&registry, 3));
        rdb_handoff::mark_load_notification_sent(registry.get_mut(3).unwrap());
        assert!(wait_for_slave_to_finish_rdb(&registry, 3));
    }

    #[test]
    fn wait_for_slave_to_finish_rdb_on_unknown_fd_is_false() {
        let registry = SessionRegistry::new(8);
        assert!(!wait_for_slave_to_finish_rdb(&registry, 9));
    }

    #[test]
    fn start_handshake_with_slave_after_rdb_replaces_the_session() {
        let server_config = ConfigBuilder::build_server(
            TEST_CERT.as_bytes(),
            TEST_KEY.as_bytes(),
            None,
            "",
            PerformanceMode::HighThroughput,
        )
        .unwrap();
        let mut registry = SessionRegistry::new(8);
        registry.attach(7, Session::new_for_test(7, Role::Client)).unwrap();
        start_handshake_with_slave_after_rdb(&mut registry, 7, &server_config, PerformanceMode::HighThroughput)
            .unwrap();
        assert!(registry.get(7).is_some());
    }

    #[test]
    fn start_handshake_with_slave_after_rdb_fails_without_a_prior_session() {
        let server_config = ConfigBuilder::build_server(
            TEST_CERT.as_bytes(),
            TEST_KEY.as_bytes(),
            None,
            "",
            PerformanceMode::HighThroughput,
        )
        .unwrap();
        let mut registry = SessionRegistry::new(8);
        assert!(start_handshake_with_slave_after_rdb(&mut registry, 7, &server_config, PerformanceMode::HighThroughput)
            .is_err());
    }
}
