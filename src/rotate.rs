//! CertRotator — zero-downtime certificate rotation with a two-generation
//! config window.
//!
//! Grounded conceptually on the `ArcSwap`-based hot-reload pattern in the
//! pack's config-reload example (swap a shared pointer under a fresh
//! `Arc`, let in-flight readers finish against the old value); adapted to
//! this core's single-threaded model (no locks, no atomics, no shared
//! mutation) — the swap here is a plain field assignment on the reactor
//! thread, not an `ArcSwap::store`.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::cert::CertInspector;
use crate::config::{ClientConfig, ConfigBuilder, PerformanceMode, ServerConfig};
use crate::error::ConfigError;
use crate::session::{Session, SessionFlags};

/// Process-wide generational TLS state — the process-wide config pair is
/// the only mutated global. Owned by whatever embeds this core;
/// [`CertRotator::renew`] is the only writer.
pub struct RotationState {
    pub server_current: ServerConfig,
    pub server_current_created_at: std::time::Instant,
    pub server_previous: Option<ServerConfig>,
    pub client_current: Option<ClientConfig>,
    pub expected_hostname: Arc<RwLock<Option<String>>>,
    pub not_before: String,
    pub not_after: String,
    pub serial: u128,
    pub connections_to_current: usize,
    pub connections_to_previous: usize,
}

impl RotationState {
    pub fn new(server: ServerConfig, not_before: String, not_after: String, serial: u128) -> Self {
        Self {
            server_current: server,
            server_current_created_at: std::time::Instant::now(),
            server_previous: None,
            client_current: None,
            expected_hostname: Arc::new(RwLock::new(None)),
            not_before,
            not_after,
            serial,
            connections_to_current: 0,
            connections_to_previous: 0,
        }
    }
}

pub struct CertRotator;

impl CertRotator {
    /// Builds the new config and validates the new certificate before
    /// touching any shared state — a failure at either step leaves
    /// `state` completely unchanged.
    ///
    /// `live_client_sessions` is every currently connected `CLIENT_ORIGIN`
    /// session, passed by mutable reference so the generation tagging
    /// below can run in place; `created_at` must be readable per-session
    /// to test whether it predates the live config. Since [`Session`]
    /// itself tracks no creation timestamp (that lives on the connection
    /// object that owns it, not the TLS session), callers pass it in
    /// alongside each session.
    ///
    /// `force_close` is invoked for every connected client whose
    /// `created_at` predates the config `server_previous` is about to be
    /// freed for — closing/detaching the fd is the caller's registry's
    /// job, not this function's.
    pub fn renew(
        state: &mut RotationState,
        new_cert_pem: &[u8],
        new_key_pem: &[u8],
        cipher_prefs: &str,
        performance_mode: PerformanceMode,
        certificate_file: Option<PathBuf>,
        private_key_file: Option<PathBuf>,
        live_client_sessions: &mut [(&mut Session, std::time::Instant)],
        mut force_close: impl FnMut(&mut Session),
    ) -> Result<(), ConfigError> {
        let mut new_server = ConfigBuilder::build_server(
            new_cert_pem,
            new_key_pem,
            None,
            cipher_prefs,
            performance_mode,
        )?;
        new_server.certificate_file = certificate_file;
        new_server.private_key_file = private_key_file;

        let (not_before, not_after, serial) =
            CertInspector::extract_validity_and_serial(new_cert_pem)?;

        // Age sessions belonging to the outgoing generation.
        if state.server_previous.is_some() {
            for (session, created_at) in live_client_sessions.iter_mut() {
                if *created_at <= state.server_current_created_at {
                    force_close(session);
                } else if session.flags.contains(SessionFlags::CLIENT_ORIGIN) {
                    if session.is_old_generation() {
                        log::warn!(
                            "fd {} already OLD_GENERATION going into a second rotation",
                            session.fd
                        );
                    }
                    session.mark_old_generation();
                }
            }
        } else {
            for (session, _created_at) in live_client_sessions.iter_mut() {
                if session.flags.contains(SessionFlags::CLIENT_ORIGIN) {
                    session.mark_old_generation();
                }
            }
        }

        // Swap, dropping whatever was in `server_previous` (at most two
        // configs are ever alive at once — a third rotation purges the
        // oldest here).
        state.server_previous = Some(std::mem::replace(&mut state.server_current, new_server));
        state.server_current_created_at = std::time::Instant::now();

        state.not_before = not_before;
        state.not_after = not_after;
        state.serial = serial;

        state.connections_to_previous = state.connections_to_current;
        state.connections_to_current = 0;

        log::info!(
            "certificate rotated, serial {} valid {} .. {}",
            state.serial,
            state.not_before,
            state.not_after
        );

        Ok(())
    }
}
