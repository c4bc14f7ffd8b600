// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Wire protocol spoken between the daemon and the FPGA over the serial link.
//!
//! This crate is standalone and does no I/O. It provides:
//!
//! - [`Packet`]: the `cmd | core | reg | count | data…` unit carried by every
//!   frame, with a big-endian CRC-16/XMODEM trailer.
//! - [`stuff_frame`]: byte-stuffed frame encoding with the [`END`] delimiter
//!   and [`ESC`] escape.
//! - [`Deframer`]: the receive state machine that reassembles frames from
//!   arbitrary read chunks.
//!
//! Frame boundary is derived solely from [`END`]; there is no length prefix.

// Attach.
pub mod crc_xmodem;
pub mod deframer;
pub mod frame;
pub mod packet;

// Re-export.
pub use crc_xmodem::*;
pub use deframer::*;
pub use frame::*;
pub use packet::*;
