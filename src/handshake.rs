//! HandshakeDriver — the shared `step()` core plus the six named
//! call-site entries, and the blocking `sync_negotiate` variant for
//! startup paths.
//!
//! Grounded on `runtime/async/tls.rs`'s handshake loop (the
//! blocked-read/blocked-write → rearm translation is reused directly,
//! generalized from "wake the polling future" to "edit reactor
//! interest"); the six named entries and `sync_negotiate` are new, since
//! the HTTP client this reactor loop was built around has exactly one
//! handshake call site rather than six.

use std::io;
use std::mem;
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use crate::engine::{NegotiateStatus, NegotiatingEngine};
use crate::error::HandshakeError;
use crate::reactor::{Interest, Reactor};

/// Checks `SO_ERROR` on `fd`, the only reliable way to learn whether a
/// non-blocking `connect()` actually succeeded. Used before driving a
/// `ClusterAsClient` handshake: entering TLS negotiation on a socket whose
/// connect failed just reports a confusing handshake-layer I/O error
/// instead of the real connect failure.
fn connect_failed(fd: RawFd) -> bool {
    let mut err: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            &mut err as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };
    rc != 0 || err != 0
}

/// Per-`step()` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Retry,
    Failed,
}

/// The named call sites a handshake can be driven from. Each carries its own
/// post-handshake and failure recovery policy; `step()` itself is
/// call-site agnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    Client,
    ClusterAsServer,
    ClusterAsClient,
    Master,
    SlaveAfterRdb,
    MasterAfterRdbLoad,
}

/// Runs one round of the handshake for `fd` against `engine`, rearming
/// `reactor` interest as needed. This is the shared core every named
/// entry point calls; callers supply the `self` callback that a later
/// readiness event should re-invoke (`register` takes an owned closure,
/// so this lives at the call site rather than inside `step`).
///
/// "Rearm": delete the opposite-direction interest, then register the
/// needed direction only if it is not already registered — this bounds a
/// handshake that always blocks on the same direction to at most one
/// reactor-interest edit per step.
pub fn step<E: NegotiatingEngine, R: Reactor>(
    engine: &mut E,
    fd: RawFd,
    reactor: &mut R,
    rearm_cb: impl FnOnce() -> Box<dyn FnMut(RawFd)>,
) -> StepStatus {
    match engine.negotiate() {
        Ok(NegotiateStatus::Done) => {
            reactor.unregister(fd, Interest::Readable);
            reactor.unregister(fd, Interest::Writable);
            StepStatus::Done
        }
        Ok(NegotiateStatus::BlockedRead) => {
            rearm(fd, Interest::Readable, reactor, rearm_cb);
            StepStatus::Retry
        }
        Ok(NegotiateStatus::BlockedWrite) => {
            rearm(fd, Interest::Writable, reactor, rearm_cb);
            StepStatus::Retry
        }
        Err(_) => {
            reactor.unregister(fd, Interest::Readable);
            reactor.unregister(fd, Interest::Writable);
            StepStatus::Failed
        }
    }
}

fn rearm<R: Reactor>(
    fd: RawFd,
    needed: Interest,
    reactor: &mut R,
    rearm_cb: impl FnOnce() -> Box<dyn FnMut(RawFd)>,
) {
    let opposite = match needed {
        Interest::Readable => Interest::Writable,
        Interest::Writable => Interest::Readable,
    };
    reactor.unregister(fd, opposite);
    if !reactor.has_callback(fd, needed) {
        let _ = reactor.register(fd, needed, rearm_cb());
    }
}

/// Named call-site entry (`negotiate_with_client`,
/// `negotiate_with_cluster_as_server`, `negotiate_with_cluster_as_client`,
/// `negotiate_with_master`, `negotiate_with_slave_after_rdb`,
/// `negotiate_with_master_after_rdb_load`). All six share `step`'s core;
/// this wrapper exists so callers can log which site drove a given
/// handshake and so each site's `Failed` branch can be matched
/// distinctly by callers.
pub struct HandshakeDriver;

impl HandshakeDriver {
    pub fn drive<E: NegotiatingEngine, R: Reactor>(
        site: CallSite,
        engine: &mut E,
        fd: RawFd,
        reactor: &mut R,
        rearm_cb: impl FnOnce() -> Box<dyn FnMut(RawFd)>,
    ) -> StepStatus {
        if site == CallSite::ClusterAsClient && connect_failed(fd) {
            log::warn!("cluster-as-client connect failed for fd {fd} (SO_ERROR), failing handshake");
            reactor.unregister(fd, Interest::Readable);
            reactor.unregister(fd, Interest::Writable);
            return StepStatus::Failed;
        }

        log::debug!("handshake step for {fd} at call site {site:?}");
        let status = step(engine, fd, reactor, rearm_cb);
        match status {
            StepStatus::Done => log::info!("handshake complete for fd {fd} ({site:?})"),
            StepStatus::Failed => log::warn!("handshake failed for fd {fd} ({site:?})"),
            StepStatus::Retry => {}
        }
        status
    }

    /// Blocking variant for startup paths that cannot yield to the
    /// reactor. Loops `engine.negotiate()`, sleeping on the engine's requested direction
    /// each round, bounded in total by `timeout`.
    pub fn sync_negotiate<E: NegotiatingEngine>(
        engine: &mut E,
        fd: RawFd,
        timeout: Duration,
        wait_ready: impl Fn(RawFd, Interest, Duration) -> io::Result<bool>,
    ) -> Result<(), HandshakeError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(HandshakeError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "sync_negotiate exceeded its deadline",
                )));
            }
            match engine.negotiate()? {
                NegotiateStatus::Done => return Ok(()),
                NegotiateStatus::BlockedRead => {
                    if !wait_ready(fd, Interest::Readable, remaining)? {
                        return Err(HandshakeError::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "sync_negotiate timed out waiting for readability",
                        )));
                    }
                }
                NegotiateStatus::BlockedWrite => {
                    if !wait_ready(fd, Interest::Writable, remaining)? {
                        return Err(HandshakeError::Io(io::Error::new(
                            io::ErrorKind::TimedOut,
                            "sync_negotiate timed out waiting for writability",
                        )));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::MockEventLoop;
    use std::cell::RefCell;

    /// Test double implementing [`NegotiatingEngine`] with a
    /// pre-scripted sequence of outcomes, used to drive `step`/`drive`
    /// without a real `rustls::Connection`.
    struct MockTlsEngine {
        script: RefCell<std::collections::VecDeque<Result<NegotiateStatus, String>>>,
        hello_seen: bool,
    }

    impl MockTlsEngine {
        fn new(script: Vec<Result<NegotiateStatus, &str>>) -> Self {
            Self {
                script: RefCell::new(
                    script
                        .into_iter()
                        .map(|r| r.map_err(|e| e.to_string()))
                        .collect(),
                ),
                hello_seen: false,
            }
        }
    }

    impl NegotiatingEngine for MockTlsEngine {
        fn negotiate(&mut self) -> Result<NegotiateStatus, HandshakeError> {
            self.hello_seen = true;
            match self.script.borrow_mut().pop_front() {
                Some(Ok(s)) => Ok(s),
                Some(Err(e)) => Err(HandshakeError::Engine(e)),
                None => Ok(NegotiateStatus::Done),
            }
        }

        fn client_hello_present(&self) -> bool {
            self.hello_seen
        }
    }

    #[test]
    fn done_clears_both_directions() {
        let mut engine = MockTlsEngine::new(vec![Ok(NegotiateStatus::Done)]);
        let mut reactor = MockEventLoop::new();
        reactor.register(5, Interest::Readable, Box::new(|_| {})).unwrap();
        let status = step(&mut engine, 5, &mut reactor, || Box::new(|_| {}));
        assert_eq!(status, StepStatus::Done);
        assert_eq!(reactor.get_mask(5), None);
    }

    #[test]
    fn blocked_read_rearms_readable() {
        let mut engine = MockTlsEngine::new(vec![Ok(NegotiateStatus::BlockedRead)]);
        let mut reactor = MockEventLoop::new();
        let status = step(&mut engine, 5, &mut reactor, || Box::new(|_| {}));
        assert_eq!(status, StepStatus::Retry);
        assert_eq!(reactor.get_mask(5), Some(Interest::Readable));
    }

    #[test]
    fn repeated_blocked_read_edits_interest_at_most_once() {
        let mut engine = MockTlsEngine::new(vec![
            Ok(NegotiateStatus::BlockedRead),
            Ok(NegotiateStatus::BlockedRead),
            Ok(NegotiateStatus::BlockedRead),
        ]);
        let mut reactor = MockEventLoop::new();
        for _ in 0..3 {
            step(&mut engine, 5, &mut reactor, || Box::new(|_| {}));
        }
        // Only the first step actually registers; subsequent steps see
        // `has_callback` already true and skip re-registering.
        assert_eq!(reactor.register_calls.len(), 1);
    }

    #[test]
    fn failure_deregisters_both_directions() {
        let mut engine = MockTlsEngine::new(vec![Err("boom")]);
        let mut reactor = MockEventLoop::new();
        reactor.register(5, Interest::Writable, Box::new(|_| {})).unwrap();
        let status = step(&mut engine, 5, &mut reactor, || Box::new(|_| {}));
        assert_eq!(status, StepStatus::Failed);
        assert_eq!(reactor.get_mask(5), None);
    }

    #[test]
    fn sync_negotiate_succeeds_once_wait_ready_reports_readiness() {
        let mut engine = MockTlsEngine::new(vec![
            Ok(NegotiateStatus::BlockedRead),
            Ok(NegotiateStatus::Done),
        ]);
        let result = HandshakeDriver::sync_negotiate(
            &mut engine,
            5,
            Duration::from_millis(100),
            |_fd, _interest, _remaining| Ok(true),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn connect_failed_is_false_for_a_healthy_connected_socket() {
        crate::init_test_logging();
        use std::net::{TcpListener, TcpStream};
        use std::os::unix::io::AsRawFd;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let _ = listener.accept().unwrap();
        assert!(!connect_failed(client.as_raw_fd()));
    }

    #[test]
    fn sync_negotiate_times_out_when_wait_ready_never_fires() {
        let mut engine = MockTlsEngine::new(vec![Ok(NegotiateStatus::BlockedRead)]);
        let result = HandshakeDriver::sync_negotiate(
            &mut engine,
            5,
            Duration::from_millis(10),
            |_fd, _interest, _remaining| Ok(false),
        );
        assert!(result.is_err());
    }
}
