//! Session — the per-connection TLS state record.
//!
//! Grounded on `runtime/async/tls.rs`'s `TlsStream<T>` field layout
//! (`inner`, `conn`, `state`), generalized to hold a raw fd instead of an
//! owned async stream: here the fd is owned by the upstream connection
//! object (client/cluster-link/replication state machine), not by the TLS
//! layer, so `Session` never closes it.

use std::os::unix::io::RawFd;

use bitflags::bitflags;

use crate::config::{ClientConfig, PerformanceMode, ServerConfig};
use crate::engine::TlsEngine;
use crate::error::HandshakeError;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SessionFlags: u8 {
        /// Counted in exactly one of {current-gen, previous-gen}
        /// counters; transitions one-way (current → previous) via a
        /// rotation.
        const CLIENT_ORIGIN         = 0b0001;
        /// Set by [`crate::rotate::CertRotator::renew`] for sessions that
        /// predate the live server configuration.
        const OLD_GENERATION        = 0b0010;
        /// Forbids any new plaintext write until the single queued `\n`
        /// byte is fully flushed.
        const PING_IN_PROGRESS      = 0b0100;
        /// Set on a replication-client session iff the `+` completion
        /// byte has been accepted by the transport.
        const LOAD_NOTIFICATION_SENT = 0b1000;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

/// Per-connection TLS state. One per live fd; `SessionRegistry` enforces
/// the "exactly one Session per live fd" invariant at the registry level.
pub struct Session {
    pub fd: RawFd,
    pub role: Role,
    pub flags: SessionFlags,
    engine: Option<TlsEngine>,
    /// Non-null iff the session currently has buffered plaintext; mirrors
    /// membership in [`crate::repeated_reads::RepeatedReadList`]. Modeled
    /// as a list-element handle (an index) rather than a pointer.
    pub cached_node: Option<usize>,
}

impl Session {
    /// `performance_mode` and SNI are consumed by the TLS engine
    /// constructor; most of the performance-mode behavior (session
    /// ticket issuance, cache size) already lives on the shared
    /// [`ServerConfig`] built by `ConfigBuilder`, since `rustls` ties
    /// those knobs to the config rather than the connection. The
    /// parameter is accepted here to make the call-site's intent
    /// explicit, not because a second per-session customization happens.
    ///
    /// No self-service blinding step runs here: `aws-lc-rs` never sleeps
    /// the calling thread on a failed-decrypt/bad-MAC alert path the way
    /// OpenSSL/BoringSSL's blinding defense does, so there is nothing for
    /// this constructor to invoke — the engine's chosen crypto provider
    /// already has the property that call would otherwise provide.
    pub fn new_server(
        fd: RawFd,
        config: &ServerConfig,
        _performance_mode: PerformanceMode,
        flags: SessionFlags,
    ) -> Result<Self, HandshakeError> {
        let engine = TlsEngine::new_server(fd, config)?;
        log::info!("new server-role session for fd {fd}");
        Ok(Self {
            fd,
            role: Role::Server,
            flags,
            engine: Some(engine),
            cached_node: None,
        })
    }

    /// See [`Self::new_server`]'s note on blinding — the same applies here.
    pub fn new_client(
        fd: RawFd,
        config: &ClientConfig,
        _performance_mode: PerformanceMode,
        peer_name_for_sni: Option<&str>,
        flags: SessionFlags,
    ) -> Result<Self, HandshakeError> {
        let server_name = peer_name_for_sni
            .map(|n| n.to_string().try_into())
            .transpose()
            .map_err(|_| HandshakeError::Engine("invalid SNI hostname".into()))?;
        let engine = TlsEngine::new_client(fd, config, server_name)?;
        log::info!("new client-role session for fd {fd}");
        Ok(Self {
            fd,
            role: Role::Client,
            flags,
            engine: Some(engine),
            cached_node: None,
        })
    }

    pub fn engine_mut(&mut self) -> &mut TlsEngine {
        self.engine.as_mut().expect("session engine already wiped")
    }

    pub fn engine(&self) -> &TlsEngine {
        self.engine.as_ref().expect("session engine already wiped")
    }

    pub fn is_client_origin(&self) -> bool {
        self.flags.contains(SessionFlags::CLIENT_ORIGIN)
    }

    pub fn is_old_generation(&self) -> bool {
        self.flags.contains(SessionFlags::OLD_GENERATION)
    }

    pub fn mark_old_generation(&mut self) {
        self.flags.insert(SessionFlags::OLD_GENERATION);
    }

    /// Tears down the session. `send_close_notify` selects between the
    /// two teardown paths this type supports: ordinary cleanup sends a
    /// best-effort `close_notify`; the RDB-handoff teardown
    /// explicitly suppresses it to avoid an alert/renegotiation race on a
    /// write-state that a forked child already poisoned.
    pub fn teardown(mut self, send_close_notify: bool) {
        if send_close_notify {
            if let Some(engine) = self.engine.as_mut() {
                if self.role == Role::Server && engine.client_hello_present() {
                    engine.shutdown();
                }
            }
        }
        if let Some(engine) = self.engine.as_mut() {
            engine.wipe();
        }
        self.engine = None;
        // `cached_node`/registry detachment and the generation-counter
        // decrement are the caller's responsibility (it must also unlink
        // the session from `RepeatedReadList`/`SessionRegistry`, which
        // this type does not own a reference to).
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(fd: RawFd, flags_role: Role) -> Self {
        let flags = if flags_role == Role::Client {
            SessionFlags::CLIENT_ORIGIN
        } else {
            SessionFlags::empty()
        };
        Self {
            fd,
            role: Role::Server,
            flags,
            engine: None,
            cached_node: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_empty_by_default() {
        crate::init_test_logging();
        let s = Session::new_for_test(1, Role::Server);
        assert!(!s.is_client_origin());
        assert!(!s.is_old_generation());
    }

    #[test]
    fn mark_old_generation_is_idempotent() {
        let mut s = Session::new_for_test(1, Role::Client);
        assert!(s.is_client_origin());
        s.mark_old_generation();
        s.mark_old_generation();
        assert!(s.is_old_generation());
    }
}
