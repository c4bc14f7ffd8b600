// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! # fpgamux-daemon
//!
//! `fpgamuxd` bridges two protocols:
//!
//! - a line-oriented ASCII control protocol (`set` / `get` / `cat` / `list` /
//!   `loadso`) on a TCP port, and
//! - a binary, framed packet protocol to an FPGA on a serial link.
//!
//! The daemon is a shell that hosts *peripheral drivers*. Each driver owns a
//! [slot], exposes named [resources], and translates control commands into
//! framed register reads and writes. Unsolicited packets from the FPGA fan
//! out to every client subscribed with `cat` on the matching resource.
//!
//! Everything runs on one thread: the [reactor]'s poll call is the only
//! suspension point, and every callback runs to completion. Drivers never
//! block; an operation that must wait parks itself behind a timer or the
//! resource's UI lock and resumes from a later dispatch.
//!
//! [slot]: crate::slot::Slot
//! [resources]: crate::slot::Resource
//! [reactor]: crate::reactor::Reactor

// Attach.
pub mod config;
pub mod core_table;
pub mod daemon;
pub mod drivers;
pub mod fabric;
pub mod ids;
pub mod limits;
pub mod link;
pub mod logging;
pub mod reactor;
pub mod router;
pub mod session;
pub mod slot;

// Re-export.
pub use config::*;
pub use core_table::*;
pub use daemon::*;
pub use fabric::*;
pub use ids::*;
pub use limits::*;
pub use link::*;
pub use router::*;
pub use session::*;
pub use slot::*;
