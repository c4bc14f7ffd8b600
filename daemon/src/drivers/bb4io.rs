// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Board I/O driver: push buttons and slide switches.
//!
//! - `buttons` is broadcast-capable. The peripheral auto-sends a packet on
//!   every edge; when at least one session has `cat`'d the resource the
//!   byte is formatted once and fanned out. With no subscribers the packet
//!   is dropped before any formatting happens.
//! - `buttons` and `switches` reads are two-phase: the get issues a
//!   hardware read, parks the session in the resource's UI lock, and the
//!   reply routes back to exactly that session when the response arrives.

use fpgamux_wire::{OpCode, Packet};
use smallvec::smallvec;
use std::fmt::Write;

use crate::drivers::abi::{DriverError, Reply, SlotDriver};
use crate::drivers::host::DriverHost;
use crate::ids::{ConnId, RscId, SlotId};
use crate::limits::E_LINK_BUSY;
use crate::slot::{RscFlags, RscSpec, SlotInfo};

pub const DRIVER_ID: u16 = 0x0001;
pub const RSC_BUTTONS: RscId = RscId(0);
pub const RSC_SWITCHES: RscId = RscId(1);

const BUTTON_REG: u8 = 0;
const BUTTON_BYTES: u8 = 1;
const SWITCH_REG: u8 = 1;
const SWITCH_BYTES: u8 = 3;

const HELP: &str = "\
Resources:
  buttons   (read, broadcast) button state as two hex digits. cat streams
            one line per edge.
  switches  (read) slide switch state as three bytes: 'xx yyzz'.
";

#[must_use]
pub fn build() -> Box<dyn SlotDriver> { Box::new(Bb4io) }

#[derive(Debug)]
pub struct Bb4io;

impl Bb4io {
    /// Issue the hardware read behind a `get` and park the session on the
    /// resource's UI lock. The empty, deferred reply suppresses the prompt
    /// until the response arrives.
    fn start_read(
        host: &mut DriverHost<'_>,
        rsc: RscId,
        reg: u8,
        count: u8,
        conn: ConnId,
        out: &mut Reply,
    ) {
        let Some(core) = host.my_core() else {
            let _ = writeln!(out, "bb4io has no FPGA core");
            return;
        };
        match host.send_packet(&Packet::read(core.0, reg, count)) {
            Ok(()) => {
                host.set_ui_lock(rsc, conn);
                out.defer();
            }
            Err(e) => {
                tracing::debug!("bb4io read not sent: {e}");
                let _ = writeln!(out, "{E_LINK_BUSY}");
            }
        }
    }
}

impl SlotDriver for Bb4io {
    fn initialize(
        &mut self,
        _slot: SlotId,
        _host: &mut DriverHost<'_>,
    ) -> Result<SlotInfo, DriverError> {
        Ok(SlotInfo {
            name: "bb4io",
            desc: "board push buttons and slide switches",
            help: HELP,
            resources: smallvec![
                RscSpec { name: "buttons", flags: RscFlags::READ_BCAST },
                RscSpec { name: "switches", flags: RscFlags::READ },
            ],
        })
    }

    fn on_get(
        &mut self,
        host: &mut DriverHost<'_>,
        rsc: RscId,
        conn: ConnId,
        out: &mut Reply,
    ) {
        match rsc {
            RSC_BUTTONS => Self::start_read(host, rsc, BUTTON_REG, BUTTON_BYTES, conn, out),
            RSC_SWITCHES => Self::start_read(host, rsc, SWITCH_REG, SWITCH_BYTES, conn, out),
            _ => {}
        }
    }

    fn on_packet(&mut self, host: &mut DriverHost<'_>, pkt: &Packet) {
        if pkt.autosend {
            // Unsolicited button edge. Skip all formatting when nobody is
            // subscribed.
            if pkt.reg == BUTTON_REG
                && !pkt.data.is_empty()
                && host.bkey(RSC_BUTTONS).is_some()
            {
                let line = format!("{:02x}\n", pkt.data[0]);
                host.broadcast_ui(RSC_BUTTONS, line.as_bytes());
            }
            return;
        }
        if !matches!(pkt.op, OpCode::Read | OpCode::WriteRead) {
            return;
        }

        // Read response: format and route to the locked session.
        let (rsc, line) = match pkt.reg {
            BUTTON_REG if !pkt.data.is_empty() => {
                (RSC_BUTTONS, format!("{:02x}\n", pkt.data[0]))
            }
            SWITCH_REG if pkt.data.len() >= 3 => (
                RSC_SWITCHES,
                format!("{:02x} {:02x}{:02x}\n", pkt.data[0], pkt.data[1], pkt.data[2]),
            ),
            _ => return,
        };
        let Some(conn) = host.ui_lock(rsc) else {
            // Nobody is waiting (the requester may have disconnected and
            // the lock was recycled); drop the reply.
            return;
        };
        host.clear_ui_lock(rsc);
        host.send_ui(conn, line.as_bytes());
        host.prompt(conn);
    }
}
