//! Reactor — the event-loop interface this core treats as an upstream
//! collaborator, referenced only by interface. The core never owns a
//! reactor instance directly; it is handed one through this trait so
//! [`crate::handshake::HandshakeDriver`] and
//! [`crate::repeated_reads::RepeatedReadScheduler`] can register/unregister
//! interest and schedule the periodic drain task without depending on a
//! concrete epoll/kqueue implementation.
//!
//! Grounded on `runtime/async/reactor.rs`'s `sys` module (the raw
//! `epoll_ctl`/`kevent` syscalls); ported from that module's per-future
//! `Waker`-registration model to a plain fd→callback registration model,
//! since this core drives callbacks directly rather than polling futures.

use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;

/// Readiness direction a callback can be registered for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interest {
    Readable,
    Writable,
}

pub type TaskId = u64;

/// Upstream collaborator interface. A `cb` is opaque to the core: it is
/// invoked by the concrete reactor implementation when the corresponding
/// readiness fires. `Box<dyn FnMut(RawFd)>` stands in for a classic
/// untyped `(cb, cbdata)` pair since Rust closures already capture their
/// own data.
pub trait Reactor {
    fn register(
        &mut self,
        fd: RawFd,
        mask: Interest,
        cb: Box<dyn FnMut(RawFd)>,
    ) -> io::Result<()>;

    fn unregister(&mut self, fd: RawFd, mask: Interest);

    /// Blocks up to `timeout_ms` (negative = forever) waiting for any
    /// registered readiness, invoking callbacks for whatever fires.
    /// Returns the number of callbacks invoked.
    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize>;

    fn schedule_periodic(&mut self, cb: Box<dyn FnMut() -> bool>) -> TaskId;

    fn cancel_task(&mut self, task_id: TaskId);

    fn get_mask(&self, fd: RawFd) -> Option<Interest>;

    fn has_callback(&self, fd: RawFd, mask: Interest) -> bool;
}

#[cfg(target_os = "linux")]
mod sys {
    use super::*;
    use libc::{
        epoll_create1, epoll_ctl, epoll_event, epoll_wait, EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT,
        EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD,
    };

    pub fn create() -> io::Result<RawFd> {
        let fd = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(fd)
        }
    }

    fn events_for(mask: Interest) -> u32 {
        match mask {
            Interest::Readable => (EPOLLIN | EPOLLERR | EPOLLHUP) as u32,
            Interest::Writable => (EPOLLOUT | EPOLLERR | EPOLLHUP) as u32,
        }
    }

    pub fn ctl(epoll_fd: RawFd, op: i32, fd: RawFd, mask: Option<Interest>) -> io::Result<()> {
        let mut event = epoll_event {
            events: mask.map(events_for).unwrap_or(0),
            u64: fd as u64,
        };
        let rc = unsafe { epoll_ctl(epoll_fd, op, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub const CTL_ADD: i32 = EPOLL_CTL_ADD;
    pub const CTL_MOD: i32 = EPOLL_CTL_MOD;
    pub const CTL_DEL: i32 = EPOLL_CTL_DEL;

    pub fn wait(epoll_fd: RawFd, timeout_ms: i32) -> io::Result<Vec<RawFd>> {
        const MAX_EVENTS: usize = 1024;
        let mut events: Vec<epoll_event> = vec![unsafe { std::mem::zeroed() }; MAX_EVENTS];
        let n = unsafe { epoll_wait(epoll_fd, events.as_mut_ptr(), MAX_EVENTS as i32, timeout_ms) };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(events[..n as usize].iter().map(|e| e.u64 as RawFd).collect())
    }
}

struct Registration {
    mask: Interest,
    cb: Box<dyn FnMut(RawFd)>,
}

struct PeriodicTask {
    cb: Box<dyn FnMut() -> bool>,
}

/// `epoll`-backed [`Reactor`]. One fd carries at most one interest at a
/// time, since the handshake's "rearm" step assumes this; registering the
/// opposite direction replaces rather than adds.
#[cfg(target_os = "linux")]
pub struct EpollReactor {
    epoll_fd: RawFd,
    regs: HashMap<RawFd, Registration>,
    periodic: HashMap<TaskId, PeriodicTask>,
    next_task_id: TaskId,
}

#[cfg(target_os = "linux")]
impl EpollReactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            epoll_fd: sys::create()?,
            regs: HashMap::new(),
            periodic: HashMap::new(),
            next_task_id: 1,
        })
    }

    /// Runs every live periodic task once, dropping any that return
    /// `false` ("self-terminate" — the drain-until-empty contract the
    /// repeated-read scheduler relies on).
    fn run_periodic(&mut self) {
        let mut dead = Vec::new();
        for (id, task) in self.periodic.iter_mut() {
            if !(task.cb)() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.periodic.remove(&id);
        }
    }
}

#[cfg(target_os = "linux")]
impl Reactor for EpollReactor {
    fn register(
        &mut self,
        fd: RawFd,
        mask: Interest,
        cb: Box<dyn FnMut(RawFd)>,
    ) -> io::Result<()> {
        let op = if self.regs.contains_key(&fd) {
            sys::CTL_MOD
        } else {
            sys::CTL_ADD
        };
        sys::ctl(self.epoll_fd, op, fd, Some(mask))?;
        self.regs.insert(fd, Registration { mask, cb });
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd, mask: Interest) {
        if let Some(reg) = self.regs.get(&fd) {
            if reg.mask == mask {
                let _ = sys::ctl(self.epoll_fd, sys::CTL_DEL, fd, None);
                self.regs.remove(&fd);
            }
        }
    }

    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        let ready = sys::wait(self.epoll_fd, timeout_ms)?;
        let mut invoked = 0;
        for fd in ready {
            if let Some(reg) = self.regs.get_mut(&fd) {
                (reg.cb)(fd);
                invoked += 1;
            }
        }
        self.run_periodic();
        Ok(invoked)
    }

    fn schedule_periodic(&mut self, cb: Box<dyn FnMut() -> bool>) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.periodic.insert(id, PeriodicTask { cb });
        id
    }

    fn cancel_task(&mut self, task_id: TaskId) {
        self.periodic.remove(&task_id);
    }

    fn get_mask(&self, fd: RawFd) -> Option<Interest> {
        self.regs.get(&fd).map(|r| r.mask)
    }

    fn has_callback(&self, fd: RawFd, mask: Interest) -> bool {
        self.regs.get(&fd).is_some_and(|r| r.mask == mask)
    }
}

#[cfg(target_os = "linux")]
impl Drop for EpollReactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll_fd);
        }
    }
}

#[cfg(target_os = "macos")]
mod kqueue_sys {
    use super::*;
    use libc::{kevent, kqueue, timespec, EVFILT_READ, EVFILT_WRITE, EV_ADD, EV_CLEAR, EV_DELETE};

    pub fn create() -> io::Result<RawFd> {
        let fd = unsafe { kqueue() };
        if fd < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(fd)
        }
    }

    fn filter_for(mask: Interest) -> i16 {
        match mask {
            Interest::Readable => EVFILT_READ,
            Interest::Writable => EVFILT_WRITE,
        }
    }

    fn change(fd: RawFd, filter: i16, flags: u16) -> libc::kevent {
        libc::kevent {
            ident: fd as usize,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: std::ptr::null_mut(),
        }
    }

    pub fn add(kq: RawFd, fd: RawFd, mask: Interest) -> io::Result<()> {
        let kev = change(fd, filter_for(mask), (EV_ADD | EV_CLEAR) as u16);
        submit(kq, &kev)
    }

    pub fn delete(kq: RawFd, fd: RawFd, mask: Interest) -> io::Result<()> {
        let kev = change(fd, filter_for(mask), EV_DELETE as u16);
        submit(kq, &kev)
    }

    fn submit(kq: RawFd, kev: &libc::kevent) -> io::Result<()> {
        let rc = unsafe { kevent(kq, kev, 1, std::ptr::null_mut(), 0, std::ptr::null()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub fn wait(kq: RawFd, timeout_ms: i32) -> io::Result<Vec<RawFd>> {
        const MAX_EVENTS: usize = 1024;
        let mut events: Vec<libc::kevent> = vec![unsafe { std::mem::zeroed() }; MAX_EVENTS];
        let ts = timespec {
            tv_sec: (timeout_ms / 1000) as libc::time_t,
            tv_nsec: ((timeout_ms % 1000) * 1_000_000) as libc::c_long,
        };
        let ts_ptr = if timeout_ms < 0 { std::ptr::null() } else { &ts as *const _ };
        let n = unsafe {
            kevent(kq, std::ptr::null(), 0, events.as_mut_ptr(), MAX_EVENTS as i32, ts_ptr)
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(events[..n as usize].iter().map(|e| e.ident as RawFd).collect())
    }
}

/// `kqueue`-backed [`Reactor`], the macOS counterpart to [`EpollReactor`].
/// Same one-interest-per-fd assumption: registering the opposite direction
/// deletes the old filter before adding the new one.
#[cfg(target_os = "macos")]
pub struct KqueueReactor {
    kq: RawFd,
    regs: HashMap<RawFd, Registration>,
    periodic: HashMap<TaskId, PeriodicTask>,
    next_task_id: TaskId,
}

#[cfg(target_os = "macos")]
impl KqueueReactor {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            kq: kqueue_sys::create()?,
            regs: HashMap::new(),
            periodic: HashMap::new(),
            next_task_id: 1,
        })
    }

    fn run_periodic(&mut self) {
        let mut dead = Vec::new();
        for (id, task) in self.periodic.iter_mut() {
            if !(task.cb)() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.periodic.remove(&id);
        }
    }
}

#[cfg(target_os = "macos")]
impl Reactor for KqueueReactor {
    fn register(
        &mut self,
        fd: RawFd,
        mask: Interest,
        cb: Box<dyn FnMut(RawFd)>,
    ) -> io::Result<()> {
        if let Some(existing) = self.regs.get(&fd) {
            if existing.mask != mask {
                kqueue_sys::delete(self.kq, fd, existing.mask)?;
            }
        }
        kqueue_sys::add(self.kq, fd, mask)?;
        self.regs.insert(fd, Registration { mask, cb });
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd, mask: Interest) {
        if let Some(reg) = self.regs.get(&fd) {
            if reg.mask == mask {
                let _ = kqueue_sys::delete(self.kq, fd, mask);
                self.regs.remove(&fd);
            }
        }
    }

    fn wait(&mut self, timeout_ms: i32) -> io::Result<usize> {
        let ready = kqueue_sys::wait(self.kq, timeout_ms)?;
        let mut invoked = 0;
        for fd in ready {
            if let Some(reg) = self.regs.get_mut(&fd) {
                (reg.cb)(fd);
                invoked += 1;
            }
        }
        self.run_periodic();
        Ok(invoked)
    }

    fn schedule_periodic(&mut self, cb: Box<dyn FnMut() -> bool>) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.periodic.insert(id, PeriodicTask { cb });
        id
    }

    fn cancel_task(&mut self, task_id: TaskId) {
        self.periodic.remove(&task_id);
    }

    fn get_mask(&self, fd: RawFd) -> Option<Interest> {
        self.regs.get(&fd).map(|r| r.mask)
    }

    fn has_callback(&self, fd: RawFd, mask: Interest) -> bool {
        self.regs.get(&fd).is_some_and(|r| r.mask == mask)
    }
}

#[cfg(target_os = "macos")]
impl Drop for KqueueReactor {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.kq);
        }
    }
}

/// In-memory [`Reactor`] double for tests that only need to observe
/// register/unregister call sequences and drive callbacks manually,
/// without a real fd or kernel event queue — used by
/// [`crate::handshake`] and [`crate::repeated_reads`] tests.
#[derive(Default)]
pub struct MockEventLoop {
    masks: HashMap<RawFd, Interest>,
    periodic: HashMap<TaskId, Box<dyn FnMut() -> bool>>,
    next_task_id: TaskId,
    pub register_calls: Vec<(RawFd, Interest)>,
    pub unregister_calls: Vec<(RawFd, Interest)>,
}

impl MockEventLoop {
    pub fn new() -> Self {
        Self {
            masks: HashMap::new(),
            periodic: HashMap::new(),
            next_task_id: 1,
            register_calls: Vec::new(),
            unregister_calls: Vec::new(),
        }
    }

    /// Runs every live periodic task once; used by tests to drive the
    /// repeated-read scheduler without a real reactor loop.
    pub fn tick(&mut self) {
        let mut dead = Vec::new();
        for (id, cb) in self.periodic.iter_mut() {
            if !cb() {
                dead.push(*id);
            }
        }
        for id in dead {
            self.periodic.remove(&id);
        }
    }

    pub fn periodic_task_count(&self) -> usize {
        self.periodic.len()
    }
}

impl Reactor for MockEventLoop {
    fn register(
        &mut self,
        fd: RawFd,
        mask: Interest,
        _cb: Box<dyn FnMut(RawFd)>,
    ) -> io::Result<()> {
        self.register_calls.push((fd, mask));
        self.masks.insert(fd, mask);
        Ok(())
    }

    fn unregister(&mut self, fd: RawFd, mask: Interest) {
        if self.masks.get(&fd) == Some(&mask) {
            self.unregister_calls.push((fd, mask));
            self.masks.remove(&fd);
        }
    }

    fn wait(&mut self, _timeout_ms: i32) -> io::Result<usize> {
        Ok(0)
    }

    fn schedule_periodic(&mut self, cb: Box<dyn FnMut() -> bool>) -> TaskId {
        let id = self.next_task_id;
        self.next_task_id += 1;
        self.periodic.insert(id, cb);
        id
    }

    fn cancel_task(&mut self, task_id: TaskId) {
        self.periodic.remove(&task_id);
    }

    fn get_mask(&self, fd: RawFd) -> Option<Interest> {
        self.masks.get(&fd).copied()
    }

    fn has_callback(&self, fd: RawFd, mask: Interest) -> bool {
        self.masks.get(&fd) == Some(&mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_unregister_clears_mask() {
        let mut r = MockEventLoop::new();
        r.register(5, Interest::Readable, Box::new(|_| {})).unwrap();
        assert_eq!(r.get_mask(5), Some(Interest::Readable));
        r.unregister(5, Interest::Readable);
        assert_eq!(r.get_mask(5), None);
    }

    #[test]
    fn unregister_wrong_direction_is_a_no_op() {
        let mut r = MockEventLoop::new();
        r.register(5, Interest::Readable, Box::new(|_| {})).unwrap();
        r.unregister(5, Interest::Writable);
        assert_eq!(r.get_mask(5), Some(Interest::Readable));
    }

    #[test]
    fn periodic_task_self_terminates() {
        let mut r = MockEventLoop::new();
        let mut ticks = 0;
        let id = r.schedule_periodic(Box::new(move || {
            ticks += 1;
            ticks < 2
        }));
        assert_eq!(r.periodic_task_count(), 1);
        r.tick();
        assert_eq!(r.periodic_task_count(), 1);
        r.tick();
        assert_eq!(r.periodic_task_count(), 0);
        r.cancel_task(id);
    }
}
