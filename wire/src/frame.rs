// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Byte-stuffed frame encoding. A frame opens and closes with [`END`]; any
//! payload [`END`] becomes `ESC 0xDC` and any payload [`ESC`] becomes
//! `ESC 0xDD`. The worst case doubles the payload, plus the two delimiters.

use smallvec::SmallVec;

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape introducer.
pub const ESC: u8 = 0xDB;
/// Follows [`ESC`] to encode a payload [`END`].
pub const ESC_END: u8 = 0xDC;
/// Follows [`ESC`] to encode a payload [`ESC`].
pub const ESC_ESC: u8 = 0xDD;

/// Stuffed frames for register-sized packets fit inline.
pub type FrameBytes = SmallVec<[u8; 32]>;

/// Wrap raw packet bytes (header + data + CRC trailer) into one stuffed
/// frame ready for the serial link.
#[must_use]
pub fn stuff_frame(packet_bytes: &[u8]) -> FrameBytes {
    let mut out = FrameBytes::with_capacity(packet_bytes.len() + 2);
    out.push(END);
    for &byte in packet_bytes {
        match byte {
            END => {
                out.push(ESC);
                out.push(ESC_END);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            other => out.push(other),
        }
    }
    out.push(END);
    out
}
