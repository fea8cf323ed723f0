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

//! Device command lines

use crate::protocol::*;
use crate::record::RecordError;

/// Range to read back from the EEPROM, kept as the hex text the user gave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRequest {
    start: String,
    length: String,
}

impl ReadRequest {
    pub fn new(start: &str, length: &str) -> Result<Self, RecordError> {
        if start.is_empty() || start.len() > ADDRESS_DIGITS || !is_hex(start) {
            return Err(RecordError::InvalidAddress(start.to_string()));
        }
        if length.is_empty() || !is_hex(length) {
            return Err(RecordError::InvalidLength(length.to_string()));
        }
        Ok(ReadRequest { start: start.to_string(), length: length.to_string() })
    }

    pub fn start(&self) -> &str {
        &self.start
    }

    pub fn length(&self) -> &str {
        &self.length
    }
}

/// `R<start> <length>\r\n`
pub fn frame_read(request: &ReadRequest) -> Vec<u8> {
    let mut line = Vec::with_capacity(request.start.len() + request.length.len() + 4);
    line.push(READ_COMMAND);
    line.extend_from_slice(request.start.as_bytes());
    line.push(b' ');
    line.extend_from_slice(request.length.as_bytes());
    line.extend_from_slice(LINE_END);
    line
}

/// `W<record>\r\n`, with the record line passed through exactly as read.
pub fn frame_write(raw_record: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(raw_record.len() + 3);
    line.push(WRITE_COMMAND);
    line.extend_from_slice(raw_record);
    line.extend_from_slice(LINE_END);
    line
}

fn is_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_read() {
        let request = ReadRequest::new("D000", "7FF").unwrap();
        assert_eq!(frame_read(&request), b"RD000 7FF\r\n".to_vec());

        let request = ReadRequest::new("0", "10").unwrap();
        assert_eq!(frame_read(&request), b"R0 10\r\n".to_vec());
    }

    #[test]
    fn test_frame_write_is_verbatim() {
        assert_eq!(
            frame_write(b"0008 df 62 D8 18 FB C3 DE 03 D8"),
            b"W0008 df 62 D8 18 FB C3 DE 03 D8\r\n".to_vec()
        );
    }

    #[test]
    fn test_read_request_validation() {
        assert!(matches!(ReadRequest::new("", "10"), Err(RecordError::InvalidAddress(_))));
        assert!(matches!(ReadRequest::new("D0000", "10"), Err(RecordError::InvalidAddress(_))));
        assert!(matches!(ReadRequest::new("D00G", "10"), Err(RecordError::InvalidAddress(_))));
        assert!(matches!(ReadRequest::new("D000", ""), Err(RecordError::InvalidLength(_))));
        assert!(matches!(ReadRequest::new("D000", "7FX"), Err(RecordError::InvalidLength(_))));
        assert!(ReadRequest::new("d000", "7ff").is_ok());
    }
}
