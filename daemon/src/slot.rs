// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Slots and resources. A slot is the unit of driver instantiation; a
//! resource is the unit of user-visible interaction — a named value on a
//! slot that is some combination of readable, writable and
//! broadcast-capable.

use std::fmt;
use std::num::NonZeroU16;

use smallvec::SmallVec;

use crate::drivers::SlotDriver;
use crate::ids::{ConnId, CoreId, RscId, SlotId};
use crate::limits::{MX_RSC, MX_SLOT};

/// Access discipline for one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RscFlags {
    pub read: bool,
    pub write: bool,
    pub broadcast: bool,
}

impl RscFlags {
    pub const READ: Self = Self { read: true, write: false, broadcast: false };
    pub const READ_WRITE: Self = Self { read: true, write: true, broadcast: false };
    pub const READ_BCAST: Self = Self { read: true, write: false, broadcast: true };
}

/// What a driver declares about one resource at init time. The set is
/// fixed for the driver's lifetime.
#[derive(Debug, Clone, Copy)]
pub struct RscSpec {
    pub name: &'static str,
    pub flags: RscFlags,
}

/// Everything a driver hands back from a successful `initialize`.
#[derive(Debug)]
pub struct SlotInfo {
    pub name: &'static str,
    pub desc: &'static str,
    pub help: &'static str,
    pub resources: SmallVec<[RscSpec; 4]>,
}

#[derive(Debug)]
pub struct Resource {
    pub name: &'static str,
    pub flags: RscFlags,
    /// Set while a hardware read is pending: the reply must resume on
    /// exactly this connection.
    pub ui_lock: Option<ConnId>,
    /// Nonzero while at least one session is subscribed (cleared lazily on
    /// the next empty fan-out).
    pub bkey: Option<NonZeroU16>,
}

impl Resource {
    fn from_spec(spec: RscSpec) -> Self {
        Self {
            name: spec.name,
            flags: spec.flags,
            ui_lock: None,
            bkey: None,
        }
    }
}

/// One slot. `driver.is_some()` if and only if the slot is in use.
pub struct Slot {
    pub name: &'static str,
    pub desc: &'static str,
    pub help: &'static str,
    pub core: Option<CoreId>,
    pub resources: Vec<Resource>,
    pub driver: Option<Box<dyn SlotDriver>>,
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("name", &self.name)
            .field("core", &self.core)
            .field("resources", &self.resources.len())
            .field("in_use", &self.driver.is_some())
            .finish()
    }
}

impl Slot {
    fn empty() -> Self {
        Self {
            name: "",
            desc: "",
            help: "",
            core: None,
            resources: Vec::new(),
            driver: None,
        }
    }

    #[must_use]
    pub fn in_use(&self) -> bool { self.driver.is_some() }

    /// Install the driver-declared identity and resource set. Resource
    /// names must be unique within the slot; duplicates and overflow are
    /// init failures.
    pub(crate) fn populate(&mut self, info: &SlotInfo) -> Result<(), SlotTableError> {
        if info.resources.len() > MX_RSC {
            return Err(SlotTableError::TooManyResources { slot_name: info.name });
        }
        for (idx, spec) in info.resources.iter().enumerate() {
            if info.resources[..idx].iter().any(|other| other.name == spec.name) {
                return Err(SlotTableError::DuplicateResource {
                    slot_name: info.name,
                    rsc_name: spec.name,
                });
            }
        }
        self.name = info.name;
        self.desc = info.desc;
        self.help = info.help;
        self.resources = info.resources.iter().copied().map(Resource::from_spec).collect();
        Ok(())
    }

    /// Return the slot to its never-used state.
    pub(crate) fn clear(&mut self) { *self = Self::empty(); }

    #[must_use]
    pub fn find_resource(&self, name: &str) -> Option<RscId> {
        self.resources
            .iter()
            .position(|rsc| rsc.name == name)
            .map(|idx| RscId(idx as u8))
    }

    #[must_use]
    pub fn resource(&self, rsc: RscId) -> Option<&Resource> {
        self.resources.get(rsc.0 as usize)
    }

    #[must_use]
    pub fn resource_mut(&mut self, rsc: RscId) -> Option<&mut Resource> {
        self.resources.get_mut(rsc.0 as usize)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SlotTableError {
    #[error("slot {0} is already in use")]
    SlotBusy(SlotId),

    #[error("no free slot")]
    NoFreeSlot,

    #[error("driver {slot_name} declares more than {MX_RSC} resources", MX_RSC = MX_RSC)]
    TooManyResources { slot_name: &'static str },

    #[error("driver {slot_name} declares resource {rsc_name} twice")]
    DuplicateResource {
        slot_name: &'static str,
        rsc_name: &'static str,
    },
}

#[derive(Debug)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl Default for SlotTable {
    fn default() -> Self { Self::new() }
}

impl SlotTable {
    #[must_use]
    pub fn new() -> Self {
        Self { slots: (0..MX_SLOT).map(|_| Slot::empty()).collect() }
    }

    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<&Slot> { self.slots.get(slot.0 as usize) }

    #[must_use]
    pub fn get_mut(&mut self, slot: SlotId) -> Option<&mut Slot> {
        self.slots.get_mut(slot.0 as usize)
    }

    /// Lowest-numbered unoccupied slot.
    #[must_use]
    pub fn next_free(&self) -> Option<SlotId> {
        self.slots
            .iter()
            .position(|slot| !slot.in_use())
            .map(|idx| SlotId(idx as u8))
    }

    /// Resolve a command-line selector: a decimal slot index, or a driver
    /// name matched against occupied slots in ascending order (first match
    /// wins — callers needing a specific instance use the index).
    #[must_use]
    pub fn find_by_selector(&self, selector: &str) -> Option<SlotId> {
        if let Ok(idx) = selector.parse::<u8>() {
            let slot = SlotId(idx);
            return self.get(slot).filter(|s| s.in_use()).map(|_| slot);
        }
        self.slots
            .iter()
            .position(|slot| slot.in_use() && slot.name == selector)
            .map(|idx| SlotId(idx as u8))
    }

    pub fn occupied(&self) -> impl Iterator<Item = (SlotId, &Slot)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.in_use())
            .map(|(idx, slot)| (SlotId(idx as u8), slot))
    }
}
