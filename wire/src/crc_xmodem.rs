// Copyright (c) 2025 R3BL LLC. Licensed under Apache License, Version 2.0.

//! CRC-16/XMODEM helpers (polynomial `0x1021`, seed `0x0000`, no reflection,
//! no final xor). The trailer is transmitted big-endian, which gives the
//! self-check property used by [`verify`]: the checksum of
//! `packet || trailer` is zero.

use crc::{CRC_16_XMODEM, Crc};

pub const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Number of trailer bytes appended to every packet.
pub const CRC_LEN: usize = 2;

#[must_use]
pub fn checksum(bytes: &[u8]) -> u16 { CRC16.checksum(bytes) }

/// Append the big-endian trailer for everything currently in `buf`.
pub fn append_crc(buf: &mut Vec<u8>) {
    let crc = checksum(buf);
    buf.extend_from_slice(&crc.to_be_bytes());
}

/// Check a received `packet || trailer` byte run. Returns the computed and
/// received values on mismatch so the caller can log them.
///
/// # Errors
///
/// Returns `(computed, received)` when the trailer does not match.
pub fn verify(bytes_with_crc: &[u8]) -> Result<(), (u16, u16)> {
    debug_assert!(bytes_with_crc.len() >= CRC_LEN);
    let (payload, trailer) = bytes_with_crc.split_at(bytes_with_crc.len() - CRC_LEN);
    let computed = checksum(payload);
    let received = u16::from_be_bytes([trailer[0], trailer[1]]);
    if computed == received {
        Ok(())
    } else {
        Err((computed, received))
    }
}

#[cfg(test)]
mod tests_crc_xmodem {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn known_vector() {
        // The classic check value for CRC-16/XMODEM.
        assert_eq!(checksum(b"123456789"), 0x31C3);
    }

    #[test]
    fn append_then_verify() {
        let mut buf = vec![0x01, 0x02, 0xC0, 0x03];
        append_crc(&mut buf);
        assert!(verify(&buf).is_ok());
    }

    #[test]
    fn checksum_of_packet_and_trailer_is_zero() {
        // crc16(P || crc16(P)_be) == 0 for any P.
        for seed in 0u8..=255 {
            let mut buf = vec![seed, seed.wrapping_add(1), 0x55];
            append_crc(&mut buf);
            assert_eq!(checksum(&buf), 0, "failed for seed {seed:#04x}");
        }
    }

    #[test]
    fn corrupted_trailer_is_detected() {
        let mut buf = vec![0xF2, 0xE1, 0x04, 0x01, 0x0F];
        append_crc(&mut buf);
        let last = buf.len() - 1;
        buf[last] ^= 0x01;
        assert!(verify(&buf).is_err());
    }
}
