//! SessionRegistry — dense `fd → Session` vector.
//!
//! No direct analogue elsewhere in this tree (nothing else here keeps an
//! fd-keyed registry); built as a bounds-checked dense vector keyed by
//! fd, on the assumption that fd is a small integer allocated densely by
//! the OS.

use std::os::unix::io::RawFd;

use crate::error::CoreError;
use crate::session::Session;

/// `registry[fd] ≠ null ⇔ Session exists` is maintained by construction:
/// every slot is `None` until [`SessionRegistry::attach`] and `None` again
/// after [`SessionRegistry::detach`].
pub struct SessionRegistry {
    slots: Vec<Option<Session>>,
}

impl SessionRegistry {
    pub fn new(size: usize) -> Self {
        let mut slots = Vec::with_capacity(size);
        slots.resize_with(size, || None);
        Self { slots }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// `assert fd < size ∧ registry[fd] == null`; store.
    pub fn attach(&mut self, fd: RawFd, session: Session) -> Result<(), CoreError> {
        let idx = fd as usize;
        let slot = self
            .slots
            .get_mut(idx)
            .ok_or_else(|| CoreError::invariant(format!("fd {fd} out of registry bounds")))?;
        if slot.is_some() {
            return Err(CoreError::invariant(format!(
                "fd {fd} already has a live session"
            )));
        }
        *slot = Some(session);
        Ok(())
    }

    pub fn detach(&mut self, fd: RawFd) -> Option<Session> {
        self.slots.get_mut(fd as usize).and_then(Option::take)
    }

    pub fn get(&self, fd: RawFd) -> Option<&Session> {
        self.slots.get(fd as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, fd: RawFd) -> Option<&mut Session> {
        self.slots.get_mut(fd as usize).and_then(Option::as_mut)
    }

    /// Fails if any fd ≥ `new_size` has a non-null entry — guards against
    /// silently losing live sessions on a `maxclients` decrease. The
    /// precondition is checked *before* the vector is ever touched; the
    /// original implementation this is modeled on called its reallocator
    /// without checking the outcome, whereas here there is nothing left to
    /// check because the precondition makes reallocation infallible by
    /// construction.
    pub fn resize(&mut self, new_size: usize) -> Result<(), CoreError> {
        if new_size < self.slots.len() {
            if self.slots[new_size..].iter().any(Option::is_some) {
                return Err(CoreError::invariant(
                    "cannot shrink registry: a live session exists at or beyond new_size",
                ));
            }
        }
        self.slots.resize_with(new_size, || None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Role, Session};

    fn dummy_session(fd: RawFd) -> Session {
        Session::new_for_test(fd, Role::Client)
    }

    #[test]
    fn attach_then_get_round_trips() {
        let mut reg = SessionRegistry::new(8);
        reg.attach(3, dummy_session(3)).unwrap();
        assert!(reg.get(3).is_some());
        assert!(reg.get(4).is_none());
    }

    #[test]
    fn attach_out_of_bounds_is_invariant_violation() {
        let mut reg = SessionRegistry::new(4);
        assert!(reg.attach(10, dummy_session(10)).is_err());
    }

    #[test]
    fn double_attach_is_invariant_violation() {
        let mut reg = SessionRegistry::new(4);
        reg.attach(1, dummy_session(1)).unwrap();
        assert!(reg.attach(1, dummy_session(1)).is_err());
    }

    #[test]
    fn detach_then_attach_succeeds() {
        let mut reg = SessionRegistry::new(4);
        reg.attach(1, dummy_session(1)).unwrap();
        assert!(reg.detach(1).is_some());
        assert!(reg.get(1).is_none());
        reg.attach(1, dummy_session(1)).unwrap();
        assert!(reg.get(1).is_some());
    }

    #[test]
    fn resize_fails_with_live_fd_beyond_new_size() {
        let mut reg = SessionRegistry::new(8);
        reg.attach(6, dummy_session(6)).unwrap();
        assert!(reg.resize(4).is_err());
        // Registry is untouched on failure.
        assert!(reg.get(6).is_some());
    }

    #[test]
    fn resize_succeeds_when_no_fd_is_live_beyond_new_size() {
        let mut reg = SessionRegistry::new(8);
        reg.attach(1, dummy_session(1)).unwrap();
        assert!(reg.resize(4).is_ok());
        assert_eq!(reg.len(), 4);
        assert!(reg.get(1).is_some());
    }
}
