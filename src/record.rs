// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! NAS record codec
//!
//! A record is a 4 digit hex address, up to 8 hex data bytes and a checksum
//! byte, e.g. `0008 DF 62 D8 18 FB C3 DE 03 D8`. The checksum is the sum of
//! the address bytes and data bytes, mod 256. Whitespace between groups is
//! optional.

use thiserror::Error;
use crate::protocol::{ADDRESS_DIGITS, MAX_PAYLOAD, RECORD_TERMINATOR};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid hex digit {found:?} at column {column}")]
    InvalidHex { found: char, column: usize },

    #[error("record has {digits} hex digits, expected an even count between 6 and 22")]
    BadLength { digits: usize },

    #[error("record carries {bytes} data bytes, at most 8 allowed")]
    PayloadTooLong { bytes: usize },

    #[error("checksum mismatch at {address:04X}: expected {expected:02X}, record says {actual:02X}")]
    ChecksumMismatch { address: u16, expected: u8, actual: u8 },

    #[error("start address {0:?} is not 1-4 hex digits")]
    InvalidAddress(String),

    #[error("length {0:?} is not a hex value")]
    InvalidLength(String),
}

// ============================================================================
// Record
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NasRecord {
    pub address: u16,
    pub payload: Vec<u8>,
    pub checksum: u8,
}

impl NasRecord {
    /// Build a record with a freshly computed checksum.
    #[cfg(test)]
    pub fn new(address: u16, payload: &[u8]) -> Result<Self, RecordError> {
        if payload.len() > MAX_PAYLOAD {
            return Err(RecordError::PayloadTooLong { bytes: payload.len() });
        }
        let checksum = checksum(address, payload);
        Ok(NasRecord { address, payload: payload.to_vec(), checksum })
    }

    /// Parse one record line. The checksum is stored as found, not verified.
    pub fn decode(line: &[u8]) -> Result<Self, RecordError> {
        let mut nibbles = Vec::with_capacity(2 * (2 + MAX_PAYLOAD + 1));
        for (column, &ch) in line.iter().enumerate() {
            if ch.is_ascii_whitespace() {
                continue;
            }
            match (ch as char).to_digit(16) {
                Some(n) => nibbles.push(n as u8),
                None => return Err(RecordError::InvalidHex { found: ch as char, column }),
            }
        }

        let digits = nibbles.len();
        if digits < ADDRESS_DIGITS + 2 || digits % 2 != 0 {
            return Err(RecordError::BadLength { digits });
        }

        let bytes: Vec<u8> = nibbles.chunks(2).map(|pair| (pair[0] << 4) | pair[1]).collect();
        let payload = &bytes[2..bytes.len() - 1];
        if payload.len() > MAX_PAYLOAD {
            return Err(RecordError::PayloadTooLong { bytes: payload.len() });
        }

        Ok(NasRecord {
            address: u16::from_be_bytes([bytes[0], bytes[1]]),
            payload: payload.to_vec(),
            checksum: bytes[bytes.len() - 1],
        })
    }

    /// Canonical text form: uppercase, groups separated by single spaces.
    pub fn encode(&self) -> Vec<u8> {
        let mut text = format!("{:04X}", self.address);
        for byte in &self.payload {
            text.push_str(&format!(" {:02X}", byte));
        }
        text.push_str(&format!(" {:02X}", self.checksum));
        text.into_bytes()
    }

    pub fn computed_checksum(&self) -> u8 {
        checksum(self.address, &self.payload)
    }

    pub fn verify_checksum(&self) -> bool {
        self.computed_checksum() == self.checksum
    }

    /// Like `verify_checksum`, but as an error carrying both values.
    pub fn check(&self) -> Result<(), RecordError> {
        let expected = self.computed_checksum();
        if expected == self.checksum {
            Ok(())
        } else {
            Err(RecordError::ChecksumMismatch { address: self.address, expected, actual: self.checksum })
        }
    }
}

/// True for the `.` line that ends a NAS file.
pub fn is_terminator(line: &[u8]) -> bool {
    line.first() == Some(&RECORD_TERMINATOR)
}

fn checksum(address: u16, payload: &[u8]) -> u8 {
    address
        .to_be_bytes()
        .iter()
        .chain(payload)
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
}

// ============================================================================
// Tests
// ============================================================================
