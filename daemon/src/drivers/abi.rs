// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The driver ABI. Every callback runs to completion on the reactor
//! thread; a driver must never block. An operation that has to wait parks
//! its state and resumes from `on_packet`, `on_timer` or `on_fd`.

use std::fmt;

use fpgamux_wire::Packet;

use crate::drivers::host::DriverHost;
use crate::ids::{ConnId, RscId, SlotId};
use crate::slot::{SlotInfo, SlotTableError};

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("driver init failed: {0}")]
    Init(String),

    #[error(transparent)]
    Table(#[from] SlotTableError),
}

/// Response buffer handed to `on_get` / `on_set`. A get that cannot be
/// answered synchronously calls [`Reply::defer`]: no text is sent and no
/// prompt is emitted — the driver later routes the formatted value to the
/// locked session itself and prompts it.
#[derive(Debug, Default)]
pub struct Reply {
    text: String,
    deferred: bool,
}

impl Reply {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Park this interaction: the reply will arrive via the UI lock.
    pub fn defer(&mut self) { self.deferred = true; }

    #[must_use]
    pub fn is_deferred(&self) -> bool { self.deferred }

    #[must_use]
    pub fn text(&self) -> &str { &self.text }

    #[must_use]
    pub fn take_text(&mut self) -> String { std::mem::take(&mut self.text) }
}

impl fmt::Write for Reply {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.text.push_str(s);
        Ok(())
    }
}

/// What a peripheral driver implements. Only `initialize` is mandatory;
/// the rest default to ignoring the event.
pub trait SlotDriver: fmt::Debug + Send {
    /// Called once when the driver is installed. Returns the slot identity
    /// and resource set; a hardware-backed driver typically also sends its
    /// setup packets and arms timers here.
    ///
    /// # Errors
    ///
    /// A failure frees the slot and is logged; the daemon continues.
    fn initialize(
        &mut self,
        slot: SlotId,
        host: &mut DriverHost<'_>,
    ) -> Result<SlotInfo, DriverError>;

    /// A validated packet arrived for the core this slot owns.
    fn on_packet(&mut self, host: &mut DriverHost<'_>, pkt: &Packet) {
        let _ = (host, pkt);
    }

    /// `get` on one of this slot's resources.
    fn on_get(&mut self, host: &mut DriverHost<'_>, rsc: RscId, conn: ConnId, out: &mut Reply) {
        let _ = (host, rsc, conn, out);
    }

    /// `set` on one of this slot's resources; `args` is the raw remainder
    /// of the command line.
    fn on_set(
        &mut self,
        host: &mut DriverHost<'_>,
        rsc: RscId,
        args: &str,
        conn: ConnId,
        out: &mut Reply,
    ) {
        let _ = (host, rsc, args, conn, out);
    }

    /// A timer armed by this driver fired. One-shots are already vacated;
    /// re-arm freely.
    fn on_timer(&mut self, host: &mut DriverHost<'_>, token: u32) {
        let _ = (host, token);
    }

    /// A file handle registered by this driver became ready.
    fn on_fd(&mut self, host: &mut DriverHost<'_>, token: u32, readable: bool) {
        let _ = (host, token, readable);
    }
}
