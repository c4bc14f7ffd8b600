// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! The packet layer: `cmd | core | reg | count | data…` plus the CRC trailer.
//!
//! `cmd` bit layout:
//!
//! | Bits | Meaning |
//! | :--- | :------ |
//! | 7    | auto-send: `1` = unsolicited data from the FPGA, `0` = read response |
//! | 3–2  | op ∈ {nop, read, write, write-then-read} |
//! | 1    | auto-increment the register on multi-byte transfers |
//! | 0    | legacy, always zero |
//!
//! On transmit the high nibble of `cmd` is forced to `0xF` and the high nibble
//! of `core` to `0xE` as FPGA-side sanity bits. On receive both high nibbles
//! are discarded (the auto-send flag is captured from bit 7 first).

use smallvec::SmallVec;

use crate::crc_xmodem::{self, CRC_LEN};

pub mod bits {
    /// Auto-send flag, bit 7 of `cmd` on packets received from the FPGA.
    pub const CMD_AUTOSEND: u8 = 0x80;
    /// Op code field, bits 3–2 of `cmd`.
    pub const CMD_OP_MASK: u8 = 0x0C;
    pub const CMD_OP_SHIFT: u8 = 2;
    /// Auto-increment flag, bit 1 of `cmd`.
    pub const CMD_AUTOINC: u8 = 0x02;
    /// Sanity nibble forced into `cmd` on transmit.
    pub const TX_CMD_SANITY: u8 = 0xF0;
    /// Sanity nibble forced into `core` on transmit.
    pub const TX_CORE_SANITY: u8 = 0xE0;
    /// Low nibble of `core` selects the target core.
    pub const CORE_MASK: u8 = 0x0F;
}

/// Fixed header bytes preceding the data run.
pub const PKT_HDR_LEN: usize = 4;
/// Largest data run a single packet may carry.
pub const MAX_DATA_LEN: usize = 510;
/// Largest packet (header + data), excluding the CRC trailer.
pub const MAX_PACKET_LEN: usize = PKT_HDR_LEN + MAX_DATA_LEN;
/// Smallest valid unstuffed frame: header plus trailer, no data.
pub const MIN_FRAME_LEN: usize = PKT_HDR_LEN + CRC_LEN;

/// Inline capacity tuned for register-sized transfers; sensor payloads rarely
/// exceed a handful of bytes.
pub type PktData = SmallVec<[u8; 16]>;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum_macros::Display, strum_macros::FromRepr,
)]
#[repr(u8)]
pub enum OpCode {
    #[strum(serialize = "nop")]
    Nop = 0,
    #[strum(serialize = "read")]
    Read = 1,
    #[strum(serialize = "write")]
    Write = 2,
    #[strum(serialize = "write-read")]
    WriteRead = 3,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("runt frame: {len} bytes, minimum is {MIN_FRAME_LEN}")]
    Runt { len: usize },

    #[error("oversize frame: {len} bytes exceeds the {MAX_PACKET_LEN} byte packet limit")]
    Oversize { len: usize },

    #[error("crc mismatch: computed {computed:#06x}, received {received:#06x}")]
    CrcMismatch { computed: u16, received: u16 },

    #[error("count {count} disagrees with {data_len} data bytes")]
    CountMismatch { count: u8, data_len: usize },

    #[error("data run of {len} bytes exceeds the {MAX_DATA_LEN} byte limit")]
    DataTooLong { len: usize },
}

/// One decoded packet, either direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub autosend: bool,
    pub op: OpCode,
    pub autoinc: bool,
    /// Target core, low nibble only.
    pub core: u8,
    /// Starting register index in the target core.
    pub reg: u8,
    /// Number of data bytes requested or carried.
    pub count: u8,
    pub data: PktData,
    /// Trailing byte present on read responses where the hardware supplied
    /// fewer bytes than requested.
    pub remaining: Option<u8>,
}

impl Packet {
    /// A register read request: ask `core` for `count` bytes starting at `reg`.
    #[must_use]
    pub fn read(core: u8, reg: u8, count: u8) -> Self {
        Self {
            autosend: false,
            op: OpCode::Read,
            autoinc: true,
            core: core & bits::CORE_MASK,
            reg,
            count,
            data: PktData::new(),
            remaining: None,
        }
    }

    /// A register write request carrying `data`.
    #[must_use]
    pub fn write(core: u8, reg: u8, data: &[u8]) -> Self {
        Self {
            autosend: false,
            op: OpCode::Write,
            autoinc: true,
            core: core & bits::CORE_MASK,
            reg,
            count: data.len() as u8,
            data: PktData::from_slice(data),
            remaining: None,
        }
    }

    /// A write-then-read request: write `data`, then read `read_count` bytes
    /// back from the same register window.
    #[must_use]
    pub fn write_read(core: u8, reg: u8, data: &[u8], read_count: u8) -> Self {
        let mut pkt = Self::write(core, reg, data);
        pkt.op = OpCode::WriteRead;
        pkt.count = read_count;
        pkt
    }

    #[must_use]
    pub fn with_autoinc(mut self, autoinc: bool) -> Self {
        self.autoinc = autoinc;
        self
    }

    fn cmd_byte(&self, sanity: u8) -> u8 {
        let mut cmd = sanity | ((self.op as u8) << bits::CMD_OP_SHIFT);
        if self.autoinc {
            cmd |= bits::CMD_AUTOINC;
        }
        if self.autosend {
            cmd |= bits::CMD_AUTOSEND;
        }
        cmd
    }

    /// Raw host→FPGA packet bytes with sanity nibbles and CRC trailer. Not
    /// yet byte-stuffed; see [`crate::stuff_frame`].
    #[must_use]
    pub fn to_request_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PKT_HDR_LEN + self.data.len() + CRC_LEN);
        buf.push(self.cmd_byte(bits::TX_CMD_SANITY));
        buf.push(bits::TX_CORE_SANITY | (self.core & bits::CORE_MASK));
        buf.push(self.reg);
        buf.push(self.count);
        buf.extend_from_slice(&self.data);
        crc_xmodem::append_crc(&mut buf);
        buf
    }

    /// Raw FPGA→host packet bytes, as the hardware would emit them. Used by
    /// tests and simulators to synthesize responses and auto-send updates.
    #[must_use]
    pub fn to_response_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PKT_HDR_LEN + self.data.len() + CRC_LEN);
        buf.push(self.cmd_byte(0));
        buf.push(bits::TX_CORE_SANITY | (self.core & bits::CORE_MASK));
        buf.push(self.reg);
        buf.push(self.count);
        buf.extend_from_slice(&self.data);
        if let Some(rem) = self.remaining {
            buf.push(rem);
        }
        crc_xmodem::append_crc(&mut buf);
        buf
    }

    /// Decode one unstuffed frame received from the FPGA: length bounds, CRC
    /// trailer, sanity-nibble stripping, count-vs-length validation.
    ///
    /// Read responses may legally carry one trailing *remaining* byte when
    /// the hardware could not supply the requested count; it is surfaced in
    /// [`Packet::remaining`] and excluded from [`Packet::data`].
    ///
    /// # Errors
    ///
    /// Any [`WireError`] leaves the frame undelivered; the caller logs and
    /// discards.
    pub fn from_frame_bytes(frame: &[u8]) -> Result<Self, WireError> {
        if frame.len() < MIN_FRAME_LEN {
            return Err(WireError::Runt { len: frame.len() });
        }
        if frame.len() > MAX_PACKET_LEN + CRC_LEN {
            return Err(WireError::Oversize { len: frame.len() });
        }
        crc_xmodem::verify(frame)
            .map_err(|(computed, received)| WireError::CrcMismatch { computed, received })?;

        let cmd = frame[0];
        let autosend = cmd & bits::CMD_AUTOSEND != 0;
        let op = OpCode::from_repr((cmd & bits::CMD_OP_MASK) >> bits::CMD_OP_SHIFT)
            .unwrap_or(OpCode::Nop);
        let autoinc = cmd & bits::CMD_AUTOINC != 0;
        let core = frame[1] & bits::CORE_MASK;
        let reg = frame[2];
        let count = frame[3];

        let body = &frame[PKT_HDR_LEN..frame.len() - CRC_LEN];
        let is_read_response =
            !autosend && matches!(op, OpCode::Read | OpCode::WriteRead);
        let (data, remaining) = if body.len() == count as usize {
            (body, None)
        } else if is_read_response && body.len() == count as usize + 1 {
            // Short read: the hardware appends how many bytes it still owes.
            (&body[..body.len() - 1], Some(body[body.len() - 1]))
        } else {
            return Err(WireError::CountMismatch { count, data_len: body.len() });
        };

        Ok(Self {
            autosend,
            op,
            autoinc,
            core,
            reg,
            count,
            data: PktData::from_slice(data),
            remaining,
        })
    }
}

#[cfg(test)]
mod tests_packet {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn request_bytes_carry_sanity_nibbles() {
        let pkt = Packet::write(4, 0, &[0x0F]);
        let bytes = pkt.to_request_bytes();
        assert_eq!(bytes[0] & 0xF0, bits::TX_CMD_SANITY);
        assert_eq!(bytes[1], bits::TX_CORE_SANITY | 4);
        assert_eq!(bytes[2], 0);
        assert_eq!(bytes[3], 1);
        assert_eq!(bytes[4], 0x0F);
    }

    #[test]
    fn response_round_trip() {
        let mut pkt = Packet::read(2, 8, 3);
        pkt.data = PktData::from_slice(&[0xAA, 0xBB, 0xCC]);
        let decoded = Packet::from_frame_bytes(&pkt.to_response_bytes()).unwrap();
        assert_eq!(decoded.core, 2);
        assert_eq!(decoded.reg, 8);
        assert_eq!(decoded.count, 3);
        assert_eq!(&decoded.data[..], &[0xAA, 0xBB, 0xCC]);
        assert_eq!(decoded.remaining, None);
        assert!(!decoded.autosend);
    }

    #[test]
    fn autosend_flag_survives_nibble_strip() {
        let mut pkt = Packet::read(7, 0, 1);
        pkt.autosend = true;
        pkt.data = PktData::from_slice(&[0x03]);
        let decoded = Packet::from_frame_bytes(&pkt.to_response_bytes()).unwrap();
        assert!(decoded.autosend);
        assert_eq!(decoded.core, 7);
    }

    #[test]
    fn short_read_response_keeps_remaining_byte() {
        // Request was for 4 bytes, hardware supplied 3 and owes 1.
        let mut buf = vec![
            (OpCode::Read as u8) << bits::CMD_OP_SHIFT,
            bits::TX_CORE_SANITY | 1,
            0x00,
            3,
            0x11,
            0x22,
            0x33,
            1, // remaining
        ];
        crate::crc_xmodem::append_crc(&mut buf);
        let decoded = Packet::from_frame_bytes(&buf).unwrap();
        assert_eq!(&decoded.data[..], &[0x11, 0x22, 0x33]);
        assert_eq!(decoded.remaining, Some(1));
    }

    #[test]
    fn crc_mismatch_is_rejected() {
        let pkt = Packet::write(1, 0, &[0x42]);
        let mut bytes = pkt.to_response_bytes();
        bytes[2] ^= 0xFF;
        assert!(matches!(
            Packet::from_frame_bytes(&bytes),
            Err(WireError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn runt_frame_is_rejected() {
        assert_eq!(
            Packet::from_frame_bytes(&[0x01, 0x02, 0x03]),
            Err(WireError::Runt { len: 3 })
        );
    }

    #[test]
    fn count_mismatch_is_rejected() {
        let mut buf = vec![0x00, bits::TX_CORE_SANITY, 0x00, 5, 0xAB];
        crate::crc_xmodem::append_crc(&mut buf);
        assert!(matches!(
            Packet::from_frame_bytes(&buf),
            Err(WireError::CountMismatch { count: 5, data_len: 1 })
        ));
    }
}
