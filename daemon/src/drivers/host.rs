// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The service surface a driver sees. The daemon constructs one
//! [`DriverHost`] per dispatch (the driver itself is temporarily lifted out
//! of its slot), so every service call runs against live daemon state with
//! no locking — nothing else runs concurrently.

use std::num::NonZeroU16;
use std::os::fd::RawFd;
use std::time::Duration;

use fpgamux_wire::Packet;

use crate::core_table::CoreTable;
use crate::drivers::registry::DriverSpec;
use crate::fabric;
use crate::ids::{ConnId, CoreId, RscId, SlotId, TimerId};
use crate::limits::PROMPT;
use crate::link::{SendError, SerialLink};
use crate::reactor::{FdOwner, Reactor, ReactorError, TimerKind, TimerOwner, TimerPoolExhausted};
use crate::session::SessionTable;
use crate::slot::SlotTable;

/// A driver load requested from inside a dispatch (the enumerator does
/// this). Performed by the daemon after the dispatch returns, so a driver
/// is never initialized while another driver call is on the stack.
#[derive(Debug)]
pub struct PendingLoad {
    /// `None` picks the next free slot.
    pub slot: Option<SlotId>,
    pub spec: &'static DriverSpec,
    /// FPGA core this driver will own, when known.
    pub core: Option<CoreId>,
}

#[derive(Debug)]
pub struct DriverHost<'a> {
    pub slot_id: SlotId,
    pub reactor: &'a mut Reactor,
    pub link: &'a mut SerialLink,
    pub sessions: &'a mut SessionTable,
    pub slots: &'a mut SlotTable,
    pub cores: &'a mut CoreTable,
    pub pending_loads: &'a mut Vec<PendingLoad>,
}

impl DriverHost<'_> {
    // ── Link ──────────────────────────────────────────────────────────

    /// Transmit one framed packet. [`SendError::Busy`] means retry from a
    /// timer; nothing was buffered.
    ///
    /// # Errors
    ///
    /// See [`SendError`].
    pub fn send_packet(&mut self, pkt: &Packet) -> Result<(), SendError> {
        self.link.send_packet(pkt)
    }

    // ── Timers and file handles ───────────────────────────────────────

    /// Arm a timer owned by this slot. `token` is echoed back to
    /// `on_timer`.
    ///
    /// # Errors
    ///
    /// Pool exhaustion; surfaced, never silent.
    pub fn add_timer(
        &mut self,
        kind: TimerKind,
        ms: u64,
        token: u32,
    ) -> Result<TimerId, TimerPoolExhausted> {
        self.reactor.timers.add(
            kind,
            Duration::from_millis(ms),
            TimerOwner { slot: self.slot_id, token },
        )
    }

    pub fn del_timer(&mut self, id: TimerId) { self.reactor.timers.del(id); }

    /// Watch a driver-owned fd. `token` is echoed back to `on_fd`.
    ///
    /// # Errors
    ///
    /// Pool exhaustion or OS registration failure.
    pub fn add_fd(
        &mut self,
        fd: RawFd,
        readable: bool,
        writable: bool,
        token: u32,
    ) -> Result<(), ReactorError> {
        self.reactor
            .add_fd(fd, readable, writable, FdOwner { slot: self.slot_id, token })
    }

    pub fn del_fd(&mut self, fd: RawFd) { self.reactor.del_fd(fd); }

    // ── Slot and core accessors ───────────────────────────────────────

    /// The FPGA core this slot owns, as assigned by the enumerator.
    #[must_use]
    pub fn my_core(&self) -> Option<CoreId> {
        self.slots.get(self.slot_id).and_then(|slot| slot.core)
    }

    // ── Targeted UI replies ───────────────────────────────────────────

    /// Write to one session. A vanished session swallows the payload (a
    /// pending read whose requester disconnected is simply dropped); a
    /// failed write tears the session down.
    pub fn send_ui(&mut self, conn: ConnId, payload: &[u8]) {
        if !self.sessions.is_active(conn) {
            return;
        }
        if self.sessions.write_bytes(conn, payload).is_err() {
            self.sessions.close(conn, self.reactor.registry());
        }
    }

    /// Emit the command-boundary prompt byte on one session.
    pub fn prompt(&mut self, conn: ConnId) { self.send_ui(conn, &[PROMPT]); }

    // ── UI lock (two-phase get) ───────────────────────────────────────

    #[must_use]
    pub fn ui_lock(&self, rsc: RscId) -> Option<ConnId> {
        self.slots
            .get(self.slot_id)
            .and_then(|slot| slot.resource(rsc))
            .and_then(|resource| resource.ui_lock)
    }

    /// Park a pending hardware read on `conn`. A second get while locked
    /// overwrites the lock: last caller wins, the earlier requester never
    /// sees a reply.
    pub fn set_ui_lock(&mut self, rsc: RscId, conn: ConnId) {
        if let Some(resource) = self
            .slots
            .get_mut(self.slot_id)
            .and_then(|slot| slot.resource_mut(rsc))
        {
            resource.ui_lock = Some(conn);
        }
    }

    pub fn clear_ui_lock(&mut self, rsc: RscId) {
        if let Some(resource) = self
            .slots
            .get_mut(self.slot_id)
            .and_then(|slot| slot.resource_mut(rsc))
        {
            resource.ui_lock = None;
        }
    }

    // ── Broadcast ─────────────────────────────────────────────────────

    /// Current broadcast key of one of this slot's resources. Publishers
    /// check this before formatting: `None` means nobody is listening and
    /// the work can be skipped entirely.
    #[must_use]
    pub fn bkey(&self, rsc: RscId) -> Option<NonZeroU16> {
        self.slots
            .get(self.slot_id)
            .and_then(|slot| slot.resource(rsc))
            .and_then(|resource| resource.bkey)
    }

    /// Fan one formatted payload out to every subscribed session. An empty
    /// fan-out clears the resource key; failed writes tear those sessions
    /// down.
    pub fn broadcast_ui(&mut self, rsc: RscId, payload: &[u8]) {
        let Some(resource) = self
            .slots
            .get_mut(self.slot_id)
            .and_then(|slot| slot.resource_mut(rsc))
        else {
            return;
        };
        let Some(key) = resource.bkey else { return };

        let outcome = fabric::fanout(self.sessions, key, payload, &mut resource.bkey);
        for conn in outcome.failed {
            self.sessions.close(conn, self.reactor.registry());
        }
    }

    // ── Deferred driver loading ───────────────────────────────────────

    /// Queue another driver for loading once this dispatch returns.
    pub fn request_load(
        &mut self,
        slot: Option<SlotId>,
        spec: &'static DriverSpec,
        core: Option<CoreId>,
    ) {
        self.pending_loads.push(PendingLoad { slot, spec, core });
    }
}
