// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Broadcast fabric: token-based subscription and fan-out.
//!
//! A `cat` on `(slot, resource)` computes a nonzero key unique to that pair
//! and stores it in the session *and* (if not already set) in the resource.
//! Publishing drivers check the resource-side key first and skip all
//! formatting work when nobody is listening. Fan-out that reaches zero
//! sessions clears the resource-side key — the lazy mechanism that keeps it
//! coherent after the last subscriber leaves.

use std::num::NonZeroU16;

use smallvec::SmallVec;

use crate::ids::{ConnId, RscId, SlotId};
use crate::limits::MX_RSC;
use crate::session::SessionTable;

/// Deterministic key for `(slot, resource)`. The `+ 1` keeps zero free as
/// the "no subscribers" state, which here is simply `None`.
#[must_use]
pub fn encode_bkey(slot: SlotId, rsc: RscId) -> NonZeroU16 {
    let raw = u16::from(slot.0) * MX_RSC as u16 + u16::from(rsc.0) + 1;
    NonZeroU16::new(raw).expect("slot*MX_RSC+rsc+1 is nonzero by construction")
}

/// What one fan-out pass did.
#[derive(Debug, PartialEq, Eq)]
pub struct FanoutOutcome {
    pub delivered: usize,
    /// Sessions whose socket write failed; the caller tears them down.
    pub failed: SmallVec<[ConnId; 2]>,
}

/// Write `payload` to every session subscribed with `key`. When no live
/// session matches, `rsc_key` is reset to `None` so the publishing driver
/// resumes skipping format work.
pub fn fanout(
    sessions: &mut SessionTable,
    key: NonZeroU16,
    payload: &[u8],
    rsc_key: &mut Option<NonZeroU16>,
) -> FanoutOutcome {
    let mut outcome = FanoutOutcome { delivered: 0, failed: SmallVec::new() };

    for conn in sessions.subscribed(key) {
        match sessions.write_bytes(conn, payload) {
            Ok(()) => outcome.delivered += 1,
            Err(_) => outcome.failed.push(conn),
        }
    }

    if outcome.delivered == 0 && outcome.failed.is_empty() {
        *rsc_key = None;
    }
    outcome
}

#[cfg(test)]
mod tests_fabric {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn keys_are_unique_per_slot_resource_pair() {
        let mut seen = std::collections::HashSet::new();
        for slot in 0..crate::limits::MX_SLOT as u8 {
            for rsc in 0..MX_RSC as u8 {
                assert!(seen.insert(encode_bkey(SlotId(slot), RscId(rsc))));
            }
        }
    }

    #[test]
    fn key_is_never_zero() {
        assert_eq!(encode_bkey(SlotId(0), RscId(0)).get(), 1);
    }

    #[test]
    fn empty_fanout_clears_the_resource_key() {
        let mut sessions = SessionTable::new();
        let key = encode_bkey(SlotId(1), RscId(0));
        let mut rsc_key = Some(key);

        let outcome = fanout(&mut sessions, key, b"03\n", &mut rsc_key);
        assert_eq!(outcome.delivered, 0);
        assert!(outcome.failed.is_empty());
        assert_eq!(rsc_key, None);
    }
}
