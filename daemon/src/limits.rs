// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Pool capacities and protocol constants. Every table in the daemon is a
//! fixed-capacity arena sized here; exhaustion is surfaced to the caller,
//! never silently grown.

/// Number of driver slots. Slot 0 is privileged: it boots the enumerator
/// that populates the others.
pub const MX_SLOT: usize = 16;

/// Number of addressable FPGA cores. The wire protocol selects the core with
/// the low nibble of the `core` byte, so this cannot exceed 16.
pub const NUM_CORE: usize = 16;

/// Resources per slot.
pub const MX_RSC: usize = 16;

/// Concurrent control-plane TCP sessions.
pub const MX_SESSION: usize = 20;

/// Timer pool size.
pub const MX_TIMER: usize = 64;

/// Driver-registered file handles.
pub const MX_FD: usize = 16;

/// Longest buffered command line, newline included.
pub const MX_CMD: usize = 80;

/// Default control-plane TCP port.
pub const DEF_PORT: u16 = 8870;

/// Emitted after every completed command so clients can detect boundaries.
pub const PROMPT: u8 = b'\\';

/// Command prefix, substituted at build time. `pcset`, `pcget`, … by
/// default; set `FPGAMUX_CMD_PREFIX` in the build environment to rebrand.
pub const CMD_PREFIX: &str = match option_env!("FPGAMUX_CMD_PREFIX") {
    Some(prefix) => prefix,
    None => "pc",
};

/// Watchdog armed for every hardware write that expects an acknowledgement.
pub const ACK_TIMEOUT_MS: u64 = 100;

/// Stable, regex-matchable user-visible error for a failed link write.
pub const E_LINK_BUSY: &str = "ERROR 100 serial link overloaded";

/// Stable, regex-matchable user-visible error for a missing write ack.
pub const E_NO_ACK: &str = "ERROR 101 no acknowledgement from peripheral";
