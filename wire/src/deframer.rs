// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! Receive-side frame reassembly. Serial reads arrive in arbitrary chunks;
//! bytes are pushed here one at a time and complete frames pop out. The
//! state machine:
//!
//! | State               | Input  | Action                    | Next       |
//! | :------------------ | :----- | :------------------------ | :--------- |
//! | skip-leading-zeroes | `0x00` | drop                      | unchanged  |
//! | skip-leading-zeroes | `END`  | drop (empty frame)        | in-packet  |
//! | skip-leading-zeroes | other  | append                    | in-packet  |
//! | in-packet           | `END`  | deliver frame if nonempty | in-packet  |
//! | in-packet           | `ESC`  | —                         | in-escape  |
//! | in-packet           | other  | append                    | in-packet  |
//! | in-escape           | `0xDC` | append `END`              | in-packet  |
//! | in-escape           | `0xDD` | append `ESC`              | in-packet  |
//! | in-escape           | other  | violation, discard buffer | in-packet  |
//!
//! A stray [`ESC`] while still skipping leading zeroes is treated as a
//! protocol violation as well, and the machine enters in-packet with an
//! empty buffer.

use crate::frame::{END, ESC, ESC_END, ESC_ESC};
use crate::packet::{MAX_PACKET_LEN, PKT_HDR_LEN};
use crate::crc_xmodem::CRC_LEN;

/// Upper bound on the accumulated (unstuffed) frame: the largest packet plus
/// its CRC trailer. Anything longer is a violation.
pub const MAX_FRAME_LEN: usize = MAX_PACKET_LEN + CRC_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxState {
    /// Initial state; the serial line idles low and can emit NULs.
    SkipLeadingZeroes,
    InPacket,
    InEscape,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameViolation {
    #[error("bad escape byte {0:#04x}")]
    BadEscape(u8),

    #[error("stray escape before any frame opened")]
    StrayEscape,

    #[error("frame exceeds {MAX_FRAME_LEN} bytes")]
    Overflow,
}

/// What one pushed byte produced.
#[derive(Debug, PartialEq, Eq)]
pub enum DeframeEvent {
    /// One complete unstuffed frame (header + data + CRC trailer).
    Frame(Vec<u8>),
    /// Protocol violation; the partial frame was discarded.
    Violation(FrameViolation),
}

#[derive(Debug)]
pub struct Deframer {
    state: RxState,
    acc: Vec<u8>,
}

impl Default for Deframer {
    fn default() -> Self { Self::new() }
}

impl Deframer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: RxState::SkipLeadingZeroes,
            acc: Vec::with_capacity(PKT_HDR_LEN + CRC_LEN),
        }
    }

    /// Push one received byte. At most one event results; the caller logs
    /// violations and hands frames to the packet router.
    pub fn push(&mut self, byte: u8) -> Option<DeframeEvent> {
        match self.state {
            RxState::SkipLeadingZeroes => match byte {
                0x00 => None,
                END => {
                    self.state = RxState::InPacket;
                    None
                }
                ESC => {
                    self.state = RxState::InPacket;
                    Some(DeframeEvent::Violation(FrameViolation::StrayEscape))
                }
                other => {
                    self.state = RxState::InPacket;
                    self.append(other)
                }
            },
            RxState::InPacket => match byte {
                END => {
                    if self.acc.is_empty() {
                        None
                    } else {
                        Some(DeframeEvent::Frame(std::mem::take(&mut self.acc)))
                    }
                }
                ESC => {
                    self.state = RxState::InEscape;
                    None
                }
                other => self.append(other),
            },
            RxState::InEscape => {
                self.state = RxState::InPacket;
                match byte {
                    ESC_END => self.append(END),
                    ESC_ESC => self.append(ESC),
                    other => {
                        self.acc.clear();
                        Some(DeframeEvent::Violation(FrameViolation::BadEscape(other)))
                    }
                }
            }
        }
    }

    fn append(&mut self, byte: u8) -> Option<DeframeEvent> {
        if self.acc.len() == MAX_FRAME_LEN {
            self.acc.clear();
            return Some(DeframeEvent::Violation(FrameViolation::Overflow));
        }
        self.acc.push(byte);
        None
    }
}

#[cfg(test)]
mod tests_deframer {
    use super::*;
    use pretty_assertions::assert_eq;

    fn feed(deframer: &mut Deframer, bytes: &[u8]) -> Vec<DeframeEvent> {
        bytes.iter().filter_map(|&b| deframer.push(b)).collect()
    }

    #[test]
    fn unstuffs_one_frame_after_leading_zeroes() {
        // 00 00 C0 01 02 DB DC 03 C0 → frame bytes 01 02 C0 03.
        let mut deframer = Deframer::new();
        let events = feed(
            &mut deframer,
            &[0x00, 0x00, 0xC0, 0x01, 0x02, 0xDB, 0xDC, 0x03, 0xC0],
        );
        assert_eq!(events, vec![DeframeEvent::Frame(vec![0x01, 0x02, 0xC0, 0x03])]);
    }

    #[test]
    fn empty_frame_is_dropped_without_error() {
        let mut deframer = Deframer::new();
        assert_eq!(feed(&mut deframer, &[END, END, END]), vec![]);
    }

    #[test]
    fn bad_escape_discards_partial_and_recovers() {
        // C0 01 DB FF 02 C0 logs one violation; the next frame parses fine.
        let mut deframer = Deframer::new();
        let events = feed(&mut deframer, &[0xC0, 0x01, 0xDB, 0xFF, 0x02, 0xC0]);
        assert_eq!(
            events,
            vec![
                DeframeEvent::Violation(FrameViolation::BadEscape(0xFF)),
                DeframeEvent::Frame(vec![0x02]),
            ]
        );

        let events = feed(&mut deframer, &[0x0A, 0x0B, 0xC0]);
        assert_eq!(events, vec![DeframeEvent::Frame(vec![0x0A, 0x0B])]);
    }

    #[test]
    fn complete_frame_delivered_partial_retained() {
        let mut deframer = Deframer::new();
        // One read returning a whole frame plus the start of the next.
        let events = feed(&mut deframer, &[0xC0, 0x11, 0x22, 0xC0, 0x33, 0x44]);
        assert_eq!(events, vec![DeframeEvent::Frame(vec![0x11, 0x22])]);

        // The rest arrives on the next readability notification.
        let events = feed(&mut deframer, &[0x55, 0xC0]);
        assert_eq!(events, vec![DeframeEvent::Frame(vec![0x33, 0x44, 0x55])]);
    }

    #[test]
    fn stray_escape_before_any_frame_is_a_violation() {
        let mut deframer = Deframer::new();
        let events = feed(&mut deframer, &[0x00, ESC, 0xDD, 0xC0]);
        assert_eq!(
            events,
            vec![
                DeframeEvent::Violation(FrameViolation::StrayEscape),
                DeframeEvent::Frame(vec![0xDD]),
            ]
        );
    }

    #[test]
    fn round_trip_all_byte_values() {
        // encode → decode is the identity for every payload byte value.
        let payload: Vec<u8> = (0u8..=255).collect();
        let stuffed = crate::stuff_frame(&payload);
        let mut deframer = Deframer::new();
        let events = feed(&mut deframer, &stuffed);
        assert_eq!(events, vec![DeframeEvent::Frame(payload)]);
    }

    #[test]
    fn oversize_frame_is_discarded() {
        let mut deframer = Deframer::new();
        let mut events = vec![];
        events.extend(deframer.push(0xC0));
        for _ in 0..=MAX_FRAME_LEN {
            events.extend(deframer.push(0x42));
        }
        assert_eq!(events, vec![DeframeEvent::Violation(FrameViolation::Overflow)]);
    }
}
