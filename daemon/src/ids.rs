// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Typed handles into the daemon's arenas. Cross-references between slots,
//! cores, resources, timers and sessions are these small integers, never
//! pointers; "null" is an `Option`, never a sentinel value.

use std::fmt;

/// Index into the slot table, `[0, MX_SLOT)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u8);

/// Index into the FPGA core table, `[0, NUM_CORE)`. Independent of slot
/// numbering; the enumerator assigns the mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(pub u8);

/// Index of a resource within its slot, `[0, MX_RSC)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RscId(pub u8);

/// Connection index of a UI session, stable for the session's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u8);

/// Handle into the timer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl fmt::Display for RscId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}
