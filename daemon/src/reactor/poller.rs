// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The readiness multiplex: one `mio::Poll` shared by the serial link, the
//! TCP listener, every UI session, and any file handle a driver registers.

use std::fmt;
use std::io;
use std::os::fd::RawFd;
use std::time::{Duration, Instant};

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Registry, Token};
use smallvec::SmallVec;

use super::timer::{TimerOwner, TimerPool};
use super::tokens::TOK_DRIVER_FD_BASE;
use crate::ids::{SlotId, TimerId};
use crate::limits::MX_FD;

/// Bound on the poll wait when no timer is armed. A daemon with no handles
/// and no timers has nothing to live for, but it degrades to a long sleep
/// rather than busy-waiting or crashing.
pub const IDLE_WAIT: Duration = Duration::from_secs(60 * 60);

const EVENTS_CAPACITY: usize = 64;

/// Driver-side identity of a registered file handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FdOwner {
    pub slot: SlotId,
    pub token: u32,
}

#[derive(Debug)]
struct FdReg {
    owner: FdOwner,
    fd: RawFd,
}

#[derive(Debug, thiserror::Error)]
pub enum ReactorError {
    #[error("file-handle pool exhausted ({MX_FD} entries)")]
    FdPoolExhausted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One readiness notification, keyed by the registration token.
#[derive(Debug, Clone, Copy)]
pub struct Ready {
    pub token: Token,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up; sessions treat this like a failed read.
    pub closed: bool,
}

/// Everything one reactor turn produced. Expired timers are reported with
/// their owner; one-shots have already been vacated from the pool.
#[derive(Debug)]
pub struct Turn {
    pub fired: SmallVec<[(TimerId, TimerOwner); 8]>,
    pub ready: SmallVec<[Ready; 8]>,
}

pub struct Reactor {
    poll: Poll,
    events: Events,
    pub timers: TimerPool,
    driver_fds: Vec<Option<FdReg>>,
}

impl fmt::Debug for Reactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactor")
            .field("timers_armed", &self.timers.armed_count())
            .field(
                "driver_fds",
                &self.driver_fds.iter().flatten().count(),
            )
            .finish_non_exhaustive()
    }
}

impl Reactor {
    /// # Errors
    ///
    /// Fails when the OS event queue cannot be created.
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENTS_CAPACITY),
            timers: TimerPool::new(),
            driver_fds: (0..MX_FD).map(|_| None).collect(),
        })
    }

    /// Registration handle for sources that live elsewhere (serial link,
    /// listener, sessions).
    #[must_use]
    pub fn registry(&self) -> &Registry { self.poll.registry() }

    /// One iteration: bounded wait on the multiplex, then report expired
    /// timers and ready handles. `EINTR` counts as an empty turn.
    ///
    /// # Errors
    ///
    /// Any poll failure other than `EINTR` is surfaced.
    pub fn turn(&mut self) -> io::Result<Turn> {
        let wait = self
            .timers
            .next_deadline()
            .map_or(IDLE_WAIT, |deadline| {
                deadline
                    .saturating_duration_since(Instant::now())
                    .min(IDLE_WAIT)
            });

        match self.poll.poll(&mut self.events, Some(wait)) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }

        let mut ready = SmallVec::new();
        for event in &self.events {
            ready.push(Ready {
                token: event.token(),
                readable: event.is_readable(),
                writable: event.is_writable(),
                closed: event.is_read_closed() || event.is_write_closed(),
            });
        }

        let fired = self.timers.pop_expired(Instant::now());
        Ok(Turn { fired, ready })
    }

    /// Register a driver-owned file handle. The fd must already be
    /// nonblocking.
    ///
    /// # Errors
    ///
    /// Fails when the fd table is full or the OS registration fails.
    pub fn add_fd(
        &mut self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        owner: FdOwner,
    ) -> Result<(), ReactorError> {
        let idx = self
            .driver_fds
            .iter()
            .position(Option::is_none)
            .ok_or(ReactorError::FdPoolExhausted)?;

        let interest = match (readable, writable) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
            // Registering for nothing is pointless; default to readable.
            _ => Interest::READABLE,
        };
        self.poll
            .registry()
            .register(&mut SourceFd(&fd), Token(TOK_DRIVER_FD_BASE + idx), interest)?;
        self.driver_fds[idx] = Some(FdReg { owner, fd });
        Ok(())
    }

    /// Deregister a driver-owned file handle. Unknown fds are a no-op.
    pub fn del_fd(&mut self, fd: RawFd) {
        for reg in &mut self.driver_fds {
            if reg.as_ref().is_some_and(|r| r.fd == fd) {
                let _ = self.poll.registry().deregister(&mut SourceFd(&fd));
                *reg = None;
                return;
            }
        }
    }

    /// Drop every fd registration owned by `slot`. Used when a slot is
    /// freed.
    pub fn del_fds_owned_by(&mut self, slot: SlotId) {
        for reg in &mut self.driver_fds {
            if reg.as_ref().is_some_and(|r| r.owner.slot == slot) {
                if let Some(r) = reg.take() {
                    let _ = self.poll.registry().deregister(&mut SourceFd(&r.fd));
                }
            }
        }
    }

    /// Resolve a driver-fd token back to its owner.
    #[must_use]
    pub fn driver_fd_owner(&self, token: Token) -> Option<FdOwner> {
        let idx = token.0.checked_sub(TOK_DRIVER_FD_BASE)?;
        self.driver_fds.get(idx)?.as_ref().map(|reg| reg.owner)
    }
}
