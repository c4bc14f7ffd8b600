// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The single-threaded cooperative event loop driving all I/O and scheduled
//! callbacks. One [`Reactor::turn`] is: find the soonest timer deadline,
//! block on the readiness multiplex with that bound, fire expired timers,
//! report ready handles. Handlers run to completion and may add or remove
//! handles and timers, including their own.

// Attach.
pub mod poller;
pub mod timer;
pub mod tokens;

// Re-export.
pub use poller::*;
pub use timer::*;
pub use tokens::*;
