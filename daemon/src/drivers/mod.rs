// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Peripheral drivers and the interface they plug into. A driver is a value
//! implementing [`SlotDriver`], constructed from the in-process [`registry`]
//! and installed into a slot either at start-up (enumeration or an explicit
//! overload) or by the `loadso` control command.

// Attach.
pub mod abi;
pub mod bb4io;
pub mod enumerator;
pub mod host;
pub mod out4;
pub mod registry;

// Re-export.
pub use abi::*;
pub use host::*;
pub use registry::*;
