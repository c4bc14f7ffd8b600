// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Inbound packet routing. Every frame the link delivers is validated
//! (CRC, length-vs-count, sane core number) and mapped to the slot that
//! owns the addressed core. Invalid frames are logged with the link name
//! and dropped; a frame for a core nobody owns yet is dropped at debug
//! level — unsolicited packets can legally arrive before every driver is
//! up during enumeration.

use fpgamux_wire::Packet;
use tracing::{debug, warn};

use crate::core_table::CoreTable;
use crate::ids::{CoreId, SlotId};

/// Decode one unstuffed frame and find the slot whose driver should see
/// it. `None` means the frame was consumed here (logged as appropriate).
#[must_use]
pub fn decode_and_route(
    frame: &[u8],
    link_name: &str,
    cores: &CoreTable,
) -> Option<(SlotId, Packet)> {
    let pkt = match Packet::from_frame_bytes(frame) {
        Ok(pkt) => pkt,
        Err(e) => {
            warn!(port = link_name, "dropping frame: {e}");
            return None;
        }
    };

    let core = CoreId(pkt.core);
    match cores.owner_of(core) {
        Some(slot) => Some((slot, pkt)),
        None => {
            debug!(
                port = link_name,
                core = %core,
                "dropping packet for unowned core"
            );
            None
        }
    }
}
