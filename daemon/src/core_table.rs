// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The FPGA-side addressing table. A *core* is a numbered peripheral inside
//! the FPGA image; its numbering is independent of slot numbering, and the
//! enumerator assigns the core ↔ slot mapping at start-up.

use crate::ids::{CoreId, SlotId};
use crate::limits::NUM_CORE;

#[derive(Debug, Clone, Copy, Default)]
pub struct CoreEntry {
    /// The identity the FPGA advertises in its driver-ID ROM. Zero means
    /// the core position is unpopulated.
    pub driver_id: u16,
    /// The slot hosting this core's driver, once bound.
    pub owner: Option<SlotId>,
}

#[derive(Debug)]
pub struct CoreTable {
    entries: [CoreEntry; NUM_CORE],
}

impl Default for CoreTable {
    fn default() -> Self { Self::new() }
}

impl CoreTable {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: [CoreEntry::default(); NUM_CORE] }
    }

    #[must_use]
    pub fn get(&self, core: CoreId) -> Option<&CoreEntry> {
        self.entries.get(core.0 as usize)
    }

    pub fn set_driver_id(&mut self, core: CoreId, driver_id: u16) {
        if let Some(entry) = self.entries.get_mut(core.0 as usize) {
            entry.driver_id = driver_id;
        }
    }

    /// Bind a core to the slot that drives it.
    pub fn bind(&mut self, core: CoreId, slot: SlotId) {
        if let Some(entry) = self.entries.get_mut(core.0 as usize) {
            entry.owner = Some(slot);
        }
    }

    /// Release any cores bound to `slot`. Used when a slot is freed.
    pub fn unbind_slot(&mut self, slot: SlotId) {
        for entry in &mut self.entries {
            if entry.owner == Some(slot) {
                entry.owner = None;
            }
        }
    }

    /// The slot that owns `core`, if the core is valid and bound.
    #[must_use]
    pub fn owner_of(&self, core: CoreId) -> Option<SlotId> {
        self.get(core).and_then(|entry| entry.owner)
    }

    pub fn iter(&self) -> impl Iterator<Item = (CoreId, &CoreEntry)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (CoreId(idx as u8), entry))
    }
}

#[cfg(test)]
mod tests_core_table {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn bind_and_lookup() {
        let mut cores = CoreTable::new();
        cores.set_driver_id(CoreId(2), 0x0001);
        cores.bind(CoreId(2), SlotId(5));
        assert_eq!(cores.owner_of(CoreId(2)), Some(SlotId(5)));
        assert_eq!(cores.owner_of(CoreId(3)), None);
    }

    #[test]
    fn out_of_range_core_is_unowned() {
        let cores = CoreTable::new();
        assert_eq!(cores.owner_of(CoreId(NUM_CORE as u8)), None);
    }

    #[test]
    fn unbind_slot_releases_all_its_cores() {
        let mut cores = CoreTable::new();
        cores.bind(CoreId(1), SlotId(3));
        cores.bind(CoreId(4), SlotId(3));
        cores.unbind_slot(SlotId(3));
        assert_eq!(cores.owner_of(CoreId(1)), None);
        assert_eq!(cores.owner_of(CoreId(4)), None);
    }
}
