// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Quad open-drain output driver. One resource, `outval`: a hex nibble
//! written straight to the peripheral's output register. Writes expect a
//! hardware acknowledgement within [`ACK_TIMEOUT_MS`]; a missing ack is
//! logged and surfaced to the session that issued the set.

use std::fmt::Write;

use fpgamux_wire::{OpCode, Packet};
use smallvec::smallvec;
use tracing::warn;

use crate::drivers::abi::{DriverError, Reply, SlotDriver};
use crate::drivers::host::DriverHost;
use crate::ids::{ConnId, RscId, SlotId, TimerId};
use crate::limits::{ACK_TIMEOUT_MS, E_LINK_BUSY, E_NO_ACK};
use crate::link::SendError;
use crate::reactor::TimerKind;
use crate::slot::{RscFlags, RscSpec, SlotInfo};

pub const DRIVER_ID: u16 = 0x0002;
pub const RSC_OUTVAL: RscId = RscId(0);

const OUT_REG: u8 = 0;
const TOK_ACK: u32 = 1;

const HELP: &str = "\
Resources:
  outval  (read-write) hex value of the four outputs, 0 through f.
          Reads answer from the last value written.
";

#[must_use]
pub fn build() -> Box<dyn SlotDriver> { Box::new(Out4::default()) }

#[derive(Debug, Default)]
pub struct Out4 {
    outval: u8,
    /// Armed between a register write and its acknowledgement.
    watchdog: Option<TimerId>,
    /// Session that issued the write the watchdog is covering.
    awaiting: Option<ConnId>,
}

impl SlotDriver for Out4 {
    fn initialize(
        &mut self,
        _slot: SlotId,
        _host: &mut DriverHost<'_>,
    ) -> Result<SlotInfo, DriverError> {
        Ok(SlotInfo {
            name: "out4",
            desc: "quad open-drain output",
            help: HELP,
            resources: smallvec![RscSpec { name: "outval", flags: RscFlags::READ_WRITE }],
        })
    }

    fn on_set(
        &mut self,
        host: &mut DriverHost<'_>,
        rsc: RscId,
        args: &str,
        conn: ConnId,
        out: &mut Reply,
    ) {
        if rsc != RSC_OUTVAL {
            return;
        }
        let value = match u8::from_str_radix(args.trim(), 16) {
            Ok(v) if v <= 0x0F => v,
            _ => {
                let _ = writeln!(out, "invalid outval: expected one hex digit, got '{args}'");
                return;
            }
        };
        let Some(core) = host.my_core() else {
            let _ = writeln!(out, "out4 has no FPGA core");
            return;
        };

        match host.send_packet(&Packet::write(core.0, OUT_REG, &[value])) {
            Ok(()) => {
                self.outval = value;
                if let Some(id) = self.watchdog.take() {
                    host.del_timer(id);
                }
                self.watchdog = host
                    .add_timer(TimerKind::OneShot, ACK_TIMEOUT_MS, TOK_ACK)
                    .ok();
                self.awaiting = Some(conn);
            }
            Err(SendError::Busy) => {
                // Hardware state unknown; the model keeps the old value.
                let _ = writeln!(out, "{E_LINK_BUSY}");
            }
            Err(SendError::Closed(e)) => {
                warn!("out4 write on dead link: {e}");
                let _ = writeln!(out, "{E_LINK_BUSY}");
            }
        }
    }

    fn on_get(
        &mut self,
        _host: &mut DriverHost<'_>,
        rsc: RscId,
        _conn: ConnId,
        out: &mut Reply,
    ) {
        if rsc == RSC_OUTVAL {
            let _ = writeln!(out, "{:x}", self.outval);
        }
    }

    fn on_packet(&mut self, host: &mut DriverHost<'_>, pkt: &Packet) {
        // Write acknowledgement: a write response with auto-send clear.
        if !pkt.autosend && pkt.op == OpCode::Write {
            if let Some(id) = self.watchdog.take() {
                host.del_timer(id);
            }
            self.awaiting = None;
        }
    }

    fn on_timer(&mut self, host: &mut DriverHost<'_>, token: u32) {
        if token != TOK_ACK {
            return;
        }
        self.watchdog = None;
        warn!("out4: {E_NO_ACK}");
        if let Some(conn) = self.awaiting.take() {
            host.send_ui(conn, format!("{E_NO_ACK}\n").as_bytes());
        }
    }
}
