// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The bootstrap driver in slot 0. It reads the FPGA's driver-ID ROM on
//! core 0, records each advertised identity in the core table, and queues
//! the matching driver for every populated core. The probe retries a few
//! times; a board that never answers leaves the daemon up with only slot 0
//! occupied.

use std::fmt::Write;

use fpgamux_wire::{OpCode, Packet};
use smallvec::smallvec;
use tracing::{error, info, warn};

use crate::drivers::abi::{DriverError, Reply, SlotDriver};
use crate::drivers::host::DriverHost;
use crate::drivers::registry;
use crate::ids::{ConnId, CoreId, RscId, SlotId, TimerId};
use crate::limits::NUM_CORE;
use crate::reactor::TimerKind;
use crate::slot::{RscFlags, RscSpec, SlotInfo};

pub const RSC_DRIVLIST: RscId = RscId(0);

const ROM_REG: u8 = 0;
const ROM_BYTES: u8 = (NUM_CORE * 2) as u8;
const PROBE_RETRY_MS: u64 = 250;
const MAX_ATTEMPTS: u8 = 4;
const TOK_RETRY: u32 = 1;

const HELP: &str = "\
Resources:
  drivlist  (read-only) one line per populated FPGA core: index,
            advertised driver ID, and the driver loaded for it.
";

#[must_use]
pub fn build() -> Box<dyn SlotDriver> { Box::new(Enumerator::new()) }

#[derive(Debug)]
enum State {
    Probing { attempts: u8, retry: Option<TimerId> },
    Done,
}

#[derive(Debug)]
pub struct Enumerator {
    state: State,
    ids: [u16; NUM_CORE],
}

impl Enumerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: State::Probing { attempts: 0, retry: None },
            ids: [0; NUM_CORE],
        }
    }

    fn probe(&mut self, host: &mut DriverHost<'_>) {
        let core = host.my_core().unwrap_or(CoreId(0));
        let State::Probing { attempts, retry } = &mut self.state else {
            return;
        };
        *attempts += 1;

        // A busy link is fine: the retry timer covers it.
        if let Err(e) = host.send_packet(&Packet::read(core.0, ROM_REG, ROM_BYTES)) {
            warn!("driver-ID probe not sent: {e}");
        }
        match host.add_timer(TimerKind::OneShot, PROBE_RETRY_MS, TOK_RETRY) {
            Ok(id) => *retry = Some(id),
            Err(e) => error!("cannot arm enumeration retry: {e}"),
        }
    }
}

impl Default for Enumerator {
    fn default() -> Self { Self::new() }
}

impl SlotDriver for Enumerator {
    fn initialize(
        &mut self,
        _slot: SlotId,
        host: &mut DriverHost<'_>,
    ) -> Result<SlotInfo, DriverError> {
        self.probe(host);
        Ok(SlotInfo {
            name: "enumerator",
            desc: "FPGA driver-ID enumeration",
            help: HELP,
            resources: smallvec![RscSpec { name: "drivlist", flags: RscFlags::READ }],
        })
    }

    fn on_packet(&mut self, host: &mut DriverHost<'_>, pkt: &Packet) {
        // The ROM answer is a read response for our register window.
        if pkt.autosend || pkt.op != OpCode::Read || pkt.reg != ROM_REG {
            return;
        }
        if pkt.data.len() < 2 {
            warn!("runt driver-ID ROM response ({} bytes)", pkt.data.len());
            return;
        }
        if let State::Probing { retry: Some(id), .. } = self.state {
            host.del_timer(id);
        }

        for (idx, pair) in pkt.data.chunks_exact(2).enumerate().take(NUM_CORE) {
            self.ids[idx] = u16::from_be_bytes([pair[0], pair[1]]);
        }

        let mut populated = 0;
        for (idx, &driver_id) in self.ids.iter().enumerate().skip(1) {
            if driver_id == 0 {
                continue;
            }
            let core = CoreId(idx as u8);
            host.cores.set_driver_id(core, driver_id);
            populated += 1;
            match registry::by_driver_id(driver_id) {
                Some(spec) => host.request_load(None, spec, Some(core)),
                None => warn!(core = %core, "no driver for advertised ID {driver_id:#06x}"),
            }
        }
        self.state = State::Done;
        info!("enumeration complete: {populated} peripheral cores advertised");
    }

    fn on_timer(&mut self, host: &mut DriverHost<'_>, token: u32) {
        if token != TOK_RETRY {
            return;
        }
        match &mut self.state {
            State::Probing { attempts, retry } => {
                *retry = None;
                if *attempts >= MAX_ATTEMPTS {
                    error!(
                        "FPGA never answered the driver-ID probe \
                         ({MAX_ATTEMPTS} attempts); no peripherals loaded"
                    );
                    self.state = State::Done;
                } else {
                    self.probe(host);
                }
            }
            State::Done => {}
        }
    }

    fn on_get(
        &mut self,
        _host: &mut DriverHost<'_>,
        rsc: RscId,
        _conn: ConnId,
        out: &mut Reply,
    ) {
        if rsc != RSC_DRIVLIST {
            return;
        }
        for (idx, &driver_id) in self.ids.iter().enumerate() {
            if driver_id == 0 && idx != 0 {
                continue;
            }
            let name = if idx == 0 {
                "enumerator"
            } else {
                registry::by_driver_id(driver_id).map_or("(unknown)", |spec| spec.name)
            };
            let _ = writeln!(out, "core {idx}: {driver_id:04x} {name}");
        }
    }
}
