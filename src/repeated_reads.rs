//! RepeatedReadScheduler — synthesizes read-handler invocations for
//! sessions whose TLS engine buffered more plaintext than one reactor
//! edge could reveal.
//!
//! No direct analogue elsewhere in this tree (async streams are driven by
//! `Future::poll`, which re-polls until `Poll::Pending` on its own); this
//! is new code registered with the reactor's `schedule_periodic` per
//! [`crate::reactor::Reactor`].

use std::os::unix::io::RawFd;

use crate::reactor::{Interest, Reactor};

/// Ordered list of fds with buffered-but-unread plaintext. Duplicates are
/// forbidden; a session's `cached_node` mirrors membership as an index
/// into this list, which this implementation approximates as "present in
/// `entries`" since fds are cheap to search in a list this short-lived.
///
/// `total_invocations`/`max_list_length` are observability counters only —
/// nothing in this module reads them back to make a decision.
#[derive(Default)]
pub struct RepeatedReadList {
    entries: Vec<RawFd>,
    total_invocations: u64,
    max_list_length: usize,
}

impl RepeatedReadList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, fd: RawFd) -> bool {
        self.entries.contains(&fd)
    }

    /// Idempotent: a second `add` for an already-queued fd is a no-op.
    pub fn add(&mut self, fd: RawFd) {
        if !self.entries.contains(&fd) {
            self.entries.push(fd);
            self.max_list_length = self.max_list_length.max(self.entries.len());
        }
    }

    /// Idempotent: removing a non-member is a no-op.
    pub fn remove(&mut self, fd: RawFd) {
        self.entries.retain(|&e| e != fd);
    }

    /// Total handler invocations synthesized by [`tick`] over this list's
    /// lifetime.
    pub fn total_invocations(&self) -> u64 {
        self.total_invocations
    }

    /// High-water mark of [`Self::len`] across every [`Self::add`].
    pub fn max_list_length(&self) -> usize {
        self.max_list_length
    }
}

/// Drives one tick of the scheduler: for each queued fd that currently
/// has READABLE interest registered, synthetically invoke
/// its read handler by calling `invoke_readable`. Entries that are no
/// longer READABLE-interested are left queued (skipped, not removed) —
/// the handler itself is responsible for calling
/// [`RepeatedReadList::remove`] once its session stops buffering.
///
/// Returns the number of handlers invoked this tick.
pub fn tick<R: Reactor>(
    list: &mut RepeatedReadList,
    reactor: &R,
    mut invoke_readable: impl FnMut(RawFd),
) -> usize {
    let mut invoked = 0;
    for &fd in &list.entries {
        if reactor.has_callback(fd, Interest::Readable) {
            invoke_readable(fd);
            invoked += 1;
        }
    }
    list.total_invocations += invoked as u64;
    log::debug!(
        "repeated-read tick invoked {invoked} handler(s), {} queued, {} total invocations",
        list.entries.len(),
        list.total_invocations
    );
    invoked
}

/// Registers the scheduler as a periodic reactor task. The task
/// self-terminates (returns `false`, per [`crate::reactor::Reactor::schedule_periodic`]'s
/// contract) once the list is empty, and the caller is expected to
/// re-register it the next time [`RepeatedReadList::add`] makes it
/// non-empty — the task should survive for as long as any session has
/// buffered plaintext.
pub struct RepeatedReadScheduler;

impl RepeatedReadScheduler {
    /// `still_pending` should return whether the list is non-empty after
    /// the owning reactor implementation has driven one tick; passed as a
    /// closure because the list and reactor are typically owned by a
    /// larger connection-table struct this crate does not define.
    pub fn schedule_periodic<R: Reactor>(
        reactor: &mut R,
        mut run_tick: impl FnMut() -> bool + 'static,
    ) -> crate::reactor::TaskId {
        reactor.schedule_periodic(Box::new(move || run_tick()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactor::MockEventLoop;

    #[test]
    fn add_twice_is_single_membership() {
        let mut list = RepeatedReadList::new();
        list.add(7);
        list.add(7);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn remove_on_non_member_is_a_no_op() {
        let mut list = RepeatedReadList::new();
        list.remove(7);
        assert!(list.is_empty());
    }

    #[test]
    fn tick_invokes_only_readable_interested_fds() {
        let mut reactor = MockEventLoop::new();
        reactor.register(3, Interest::Readable, Box::new(|_| {})).unwrap();
        // fd 4 has no registered interest (e.g. handler not yet re-armed).
        let mut list = RepeatedReadList::new();
        list.add(3);
        list.add(4);

        let mut invoked = Vec::new();
        let n = tick(&mut list, &reactor, |fd| invoked.push(fd));
        assert_eq!(n, 1);
        assert_eq!(invoked, vec![3]);
        assert_eq!(list.total_invocations(), 1);
    }

    #[test]
    fn tick_on_empty_list_invokes_nothing() {
        let reactor = MockEventLoop::new();
        let mut list = RepeatedReadList::new();
        let n = tick(&mut list, &reactor, |_| panic!("should not be called"));
        assert_eq!(n, 0);
        assert_eq!(list.total_invocations(), 0);
    }

    #[test]
    fn max_list_length_tracks_high_water_mark_across_removals() {
        let mut list = RepeatedReadList::new();
        list.add(1);
        list.add(2);
        list.add(3);
        assert_eq!(list.max_list_length(), 3);
        list.remove(1);
        list.remove(2);
        assert_eq!(list.len(), 1);
        assert_eq!(list.max_list_length(), 3);
    }
}
