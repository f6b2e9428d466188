//! RdbHandoff — post-fork TLS teardown-and-renegotiate on the same fd,
//! used when shipping an RDB snapshot to a replica without a TCP
//! reconnect.
//!
//! No analogue elsewhere in this tree (nothing else here forks to ship
//! bulk data over an existing TLS stream); new code reusing
//! [`crate::session::Session`]'s `teardown` and
//! [`crate::handshake::HandshakeDriver`]'s `step` core for the
//! renegotiation itself.

use std::os::unix::io::RawFd;

use crate::config::{ClientConfig, PerformanceMode, ServerConfig};
use crate::error::HandshakeError;
use crate::session::{Role, Session, SessionFlags};

/// What the slave-side (master process) read handler saw on the
/// liveness/completion channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveSignal {
    /// `\n` — liveness ping; caller should only update the ack timestamp.
    Ping,
    /// `+` — slave finished loading the RDB; time to renegotiate.
    RdbLoaded,
    /// Anything else is a protocol violation; the caller must free the
    /// slave.
    Protocol,
}

pub fn classify_slave_byte(byte: u8) -> SlaveSignal {
    match byte {
        b'\n' => SlaveSignal::Ping,
        b'+' => SlaveSignal::RdbLoaded,
        _ => SlaveSignal::Protocol,
    }
}

/// Master-process side of the handoff: the slave-side sequence as seen
/// from the master process. Tears down the poisoned session WITHOUT a
/// close_notify (the write side was corrupted by the forked child's raw
/// writes; a shutdown alert would inject garbage into the stream the
/// slave is about to renegotiate on top of), then constructs a fresh
/// server-role session on the same fd for the renegotiation handshake.
pub fn begin_master_side_renegotiation(
    old_session: Session,
    fd: RawFd,
    config: &ServerConfig,
    performance_mode: PerformanceMode,
) -> Result<Session, HandshakeError> {
    old_session.teardown(false);
    log::info!("fd {fd} entering post-RDB master-side renegotiation");
    Session::new_server(fd, config, performance_mode, SessionFlags::CLIENT_ORIGIN)
}

/// Replica-process side of the handoff, named from the replica's point of
/// view: it is renegotiating *with* its master. `master_hostname` is
/// passed through for SNI.
pub fn begin_replica_side_renegotiation(
    old_session: Session,
    fd: RawFd,
    config: &ClientConfig,
    performance_mode: PerformanceMode,
    master_hostname: Option<&str>,
) -> Result<Session, HandshakeError> {
    old_session.teardown(false);
    log::info!("fd {fd} entering post-RDB replica-side renegotiation");
    Session::new_client(
        fd,
        config,
        performance_mode,
        master_hostname,
        SessionFlags::empty(),
    )
}

/// Pre-fork preparation: for any slave in `WAIT_BGSAVE_END`, delete its
/// readable event on the master side *before* the fork, so a
/// slave that initiates renegotiation early doesn't spuriously trigger the
/// still-installed command-read handler on handshake bytes.
pub fn delete_read_handlers_for_slaves_waiting_bgsave<R: crate::reactor::Reactor>(
    reactor: &mut R,
    waiting_slave_fds: &[RawFd],
) {
    for &fd in waiting_slave_fds {
        reactor.unregister(fd, crate::reactor::Interest::Readable);
    }
}

/// `true` once [`SessionFlags::LOAD_NOTIFICATION_SENT`] has been
/// observed accepted by the transport.
pub fn load_notification_sent(session: &Session) -> bool {
    session.flags.contains(SessionFlags::LOAD_NOTIFICATION_SENT)
}

pub fn mark_load_notification_sent(session: &mut Session) {
    session.flags.insert(SessionFlags::LOAD_NOTIFICATION_SENT);
    log::info!("fd {} RDB load-notification accepted by transport", session.fd);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::MockEventLoop;

    #[test]
    fn classify_slave_byte_matches_protocol() {
        assert_eq!(classify_slave_byte(b'\n'), SlaveSignal::Ping);
        assert_eq!(classify_slave_byte(b'+'), SlaveSignal::RdbLoaded);
        assert_eq!(classify_slave_byte(b'x'), SlaveSignal::Protocol);
    }

    #[test]
    fn load_notification_flag_round_trips() {
        let mut s = Session::new_for_test(9, Role::Client);
        assert!(!load_notification_sent(&s));
        mark_load_notification_sent(&mut s);
        assert!(load_notification_sent(&s));
    }

    #[test]
    fn pre_fork_prep_unregisters_only_named_fds() {
        let mut reactor = MockEventLoop::new();
        reactor
            .register(3, crate::reactor::Interest::Readable, Box::new(|_| {}))
            .unwrap();
        reactor
            .register(4, crate::reactor::Interest::Readable, Box::new(|_| {}))
            .unwrap();
        delete_read_handlers_for_slaves_waiting_bgsave(&mut reactor, &[3]);
        assert_eq!(reactor.get_mask(3), None);
        assert_eq!(reactor.get_mask(4), Some(crate::reactor::Interest::Readable));
    }
}
