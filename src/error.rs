//! Error taxonomy for the TLS core.
//!
//! Four of the five classes in the design are ordinary `Result` types that
//! never unwind across the reactor boundary (call sites match on them and
//! apply their own recovery policy). The fifth, [`CoreError::Invariant`],
//! is reserved for registry/ownership bugs that cannot be safely continued
//! through and is the only variant this crate ever turns into a panic.

use std::fmt;
use std::io;

/// Certificate/key/DH/cipher material failed to load. Fatal at process
/// start, recoverable at [`crate::rotate::CertRotator::renew`] (the old
/// configuration stays live).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("bad certificate: {0}")]
    BadCertificate(String),
    #[error("bad private key: {0}")]
    BadKey(String),
    #[error("bad cipher preference string: {0}")]
    BadCipherPrefs(String),
    #[error("missing or unreadable trust root: {0}")]
    MissingTrustRoot(String),
}

/// A TLS handshake failed outside the "blocked, try again" class. Each
/// [`crate::handshake`] call site maps this to its own recovery (free the
/// client, free the cluster link, cancel the replication handshake).
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("TLS engine error: {0}")]
    Engine(String),
    #[error("I/O error during handshake: {0}")]
    Io(#[from] io::Error),
}

/// An engine error whose class is "IO" — surfaced with the OS errno so
/// upstream callers treat it exactly like a plain socket error.
#[derive(Debug)]
pub struct TransportError(pub io::Error);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

/// Top-level error returned by the core's fallible entry points.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Registry bounds violation, double-insert, or any other condition
    /// that indicates a reactor/ownership bug. Process-fatal by design.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl CoreError {
    /// Asserts an invariant, converting a failure into the fatal variant.
    /// Call sites that hit this should `panic!` immediately; the error
    /// value exists only so unit tests can assert on the message without
    /// killing the test process.
    pub fn invariant(msg: impl Into<String>) -> Self {
        CoreError::Invariant(msg.into())
    }
}
